//! Stable allocation keys.
//!
//! Pods whose names survive recreation (TApp instances, StatefulSet replicas)
//! hold their IP under `<namespace>_<pod>`. Deployment pods get random names,
//! so their IPs are held under `_deployment_<namespace>_<deployment>_<pod>`,
//! and collapse into the pool key `_deployment_<namespace>_<deployment>_` once
//! the pod is gone. Namespaces and object names cannot contain `_`, which is
//! what makes every shape invertible.

use crds::DEPLOYMENT_KEY_PREFIX;
use std::fmt;

/// Parsed allocation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PodKey {
    Plain { namespace: String, pod: String },
    DeploymentPod { namespace: String, deployment: String, pod: String },
    DeploymentPrefix { namespace: String, deployment: String },
}

impl PodKey {
    pub fn plain(namespace: &str, pod: &str) -> Self {
        PodKey::Plain {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        }
    }

    pub fn deployment_pod(namespace: &str, deployment: &str, pod: &str) -> Self {
        PodKey::DeploymentPod {
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            pod: pod.to_string(),
        }
    }

    pub fn deployment_prefix(namespace: &str, deployment: &str) -> Self {
        PodKey::DeploymentPrefix {
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
        }
    }

    /// Parses a stored key. Deployment shapes are recognized by their prefix,
    /// everything else must be `<namespace>_<pod>`.
    pub fn parse(key: &str) -> Option<Self> {
        if key.starts_with(DEPLOYMENT_KEY_PREFIX) {
            let (deployment, pod, namespace) = parse_deployment_key(key)?;
            return Some(if pod.is_empty() {
                PodKey::deployment_prefix(&namespace, &deployment)
            } else {
                PodKey::deployment_pod(&namespace, &deployment, &pod)
            });
        }
        let (namespace, pod) = split_plain(key)?;
        Some(PodKey::plain(namespace, pod))
    }

    pub fn namespace(&self) -> &str {
        match self {
            PodKey::Plain { namespace, .. }
            | PodKey::DeploymentPod { namespace, .. }
            | PodKey::DeploymentPrefix { namespace, .. } => namespace,
        }
    }

    pub fn is_deployment(&self) -> bool {
        !matches!(self, PodKey::Plain { .. })
    }

    /// `<namespace>_<owner>` of the owning app. Plain keys need an `-<index>` suffix.
    pub fn app_full_name(&self) -> Option<String> {
        match self {
            PodKey::Plain { .. } => {
                let (owner, _, namespace) = parse_plain_key(&self.to_string())?;
                Some(app_full_name(&namespace, &owner))
            }
            PodKey::DeploymentPod { namespace, deployment, .. }
            | PodKey::DeploymentPrefix { namespace, deployment } => Some(app_full_name(namespace, deployment)),
        }
    }

    /// Trailing instance id of a plain key (`"3"` for `ns_app-3`).
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            PodKey::Plain { pod, .. } => pod.rsplit_once('-').map(|(_, id)| id),
            _ => None,
        }
    }

    /// Numeric pod index of a plain key.
    pub fn pod_index(&self) -> Option<u32> {
        self.instance_id()?.parse().ok()
    }

    /// Pool key of a deployment key.
    pub fn to_deployment_prefix(&self) -> Option<PodKey> {
        match self {
            PodKey::Plain { .. } => None,
            PodKey::DeploymentPod { namespace, deployment, .. }
            | PodKey::DeploymentPrefix { namespace, deployment } => {
                Some(PodKey::deployment_prefix(namespace, deployment))
            }
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodKey::Plain { namespace, pod } => f.write_str(&plain_key(namespace, pod)),
            PodKey::DeploymentPod { namespace, deployment, pod } => {
                f.write_str(&deployment_pod_key(namespace, deployment, pod))
            }
            PodKey::DeploymentPrefix { namespace, deployment } => {
                f.write_str(&deployment_prefix_key(namespace, deployment))
            }
        }
    }
}

pub fn plain_key(namespace: &str, pod: &str) -> String {
    format!("{}_{}", namespace, pod)
}

pub fn deployment_pod_key(namespace: &str, deployment: &str, pod: &str) -> String {
    format!("{}{}_{}_{}", DEPLOYMENT_KEY_PREFIX, namespace, deployment, pod)
}

pub fn deployment_prefix_key(namespace: &str, deployment: &str) -> String {
    format!("{}{}_{}_", DEPLOYMENT_KEY_PREFIX, namespace, deployment)
}

pub fn app_full_name(namespace: &str, name: &str) -> String {
    format!("{}_{}", namespace, name)
}

fn split_plain(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.split('_');
    let namespace = parts.next()?;
    let pod = parts.next()?;
    if parts.next().is_some() || namespace.is_empty() || pod.is_empty() {
        return None;
    }
    Some((namespace, pod))
}

/// Splits `<namespace>_<owner>-<index>` into `(owner, index, namespace)`.
pub fn parse_plain_key(key: &str) -> Option<(String, String, String)> {
    let (namespace, pod) = split_plain(key)?;
    let (owner, index) = pod.rsplit_once('-')?;
    Some((owner.to_string(), index.to_string(), namespace.to_string()))
}

/// Splits a deployment key into `(deployment, pod, namespace)`; `pod` is empty for pool keys.
pub fn parse_deployment_key(key: &str) -> Option<(String, String, String)> {
    let rest = key.strip_prefix(DEPLOYMENT_KEY_PREFIX)?;
    let parts: Vec<&str> = rest.split('_').collect();
    let (namespace, deployment, pod) = match parts.as_slice() {
        [namespace, deployment] => (*namespace, *deployment, ""),
        [namespace, deployment, pod] => (*namespace, *deployment, *pod),
        _ => return None,
    };
    if namespace.is_empty() || deployment.is_empty() {
        return None;
    }
    Some((deployment.to_string(), pod.to_string(), namespace.to_string()))
}

//! Recording the IPs of running pods.
//!
//! Pods may come up with an IP the store never saw (store restored from an
//! old backup, pods created before the controller ran). Those IPs are
//! recorded under the pod's key, and pods missing the allocation info
//! annotation get it patched in.

use super::{PassStats, Reconciler};
use crate::error::ControllerError;
use crate::keys::PodKey;
use crate::snapshot::PodIndex;
use crds::{ANNOTATION_IP_INFO, ANNOTATION_SECOND_IP_INFO, LABEL_RELEASE_POLICY, ReleasePolicy};
use ipam_client::{FloatingIpamTrait, IpInfo, IpamError};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

const POD_PHASE_RUNNING: &str = "Running";

/// What syncing one IP did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IpSync {
    AlreadyBound,
    Allocated,
}

impl Reconciler {
    /// Syncs every selected pod, logging per-pod failures.
    pub(crate) async fn sync_pod_ips(&self, pods: &PodIndex, stats: &mut PassStats) {
        for (key, pod) in pods.pods() {
            if let Err(e) = self.sync_pod_ip(key, pod, stats).await {
                if matches!(e, ControllerError::IpConflict { .. }) {
                    stats.conflicts += 1;
                } else {
                    stats.failures += 1;
                }
                warn!("{}", e);
            }
        }
    }

    pub(crate) async fn sync_pod_ip(&self, key: &PodKey, pod: &Pod, stats: &mut PassStats) -> Result<(), ControllerError> {
        let Some(status) = pod.status.as_ref() else {
            return Ok(());
        };
        if status.phase.as_deref() != Some(POD_PHASE_RUNNING) {
            return Ok(());
        }

        let key = key.to_string();
        let pod_ip = status.pod_ip.as_deref().and_then(|ip| ip.parse::<IpAddr>().ok());
        let Some(ip) = pod_ip else {
            // The pod lost its IP annotation; it is repaired from the store.
            let scheduled = pod
                .spec
                .as_ref()
                .and_then(|spec| spec.node_name.as_deref())
                .is_some_and(|node| !node.is_empty());
            if scheduled {
                return self.sync_pod_annotation(&key, pod, stats).await;
            }
            return Ok(());
        };

        if self.sync_ip(self.ipam.as_ref(), &key, ip, pod).await? == IpSync::Allocated {
            stats.allocated += 1;
        }

        if let Some(second_ipam) = self.second_ipam.as_deref() {
            if let Some(raw) = pod.annotations().get(ANNOTATION_SECOND_IP_INFO).filter(|v| !v.is_empty()) {
                let info: IpInfo = serde_json::from_str(raw).map_err(|e| {
                    ControllerError::InvalidAnnotation(format!("second ip info {:?} of pod {}: {}", raw, key, e))
                })?;
                if self.sync_ip(second_ipam, &key, info.ip.addr(), pod).await? == IpSync::Allocated {
                    stats.allocated += 1;
                }
            }
        }

        self.sync_pod_annotation(&key, pod, stats).await
    }

    /// Makes sure `ip` is bound to `key` in `ipam`.
    ///
    /// An IP bound to another key is a conflict and is left alone.
    pub(crate) async fn sync_ip(
        &self,
        ipam: &dyn FloatingIpamTrait,
        key: &str,
        ip: IpAddr,
        pod: &Pod,
    ) -> Result<IpSync, ControllerError> {
        match ipam.query_by_ip(ip).await? {
            Some(stored_key) if stored_key == key => Ok(IpSync::AlreadyBound),
            Some(stored_key) => Err(ControllerError::IpConflict {
                ip,
                key: key.to_string(),
                stored_key,
            }),
            None => {
                let policy = ReleasePolicy::from_label(pod.labels().get(LABEL_RELEASE_POLICY).map(String::as_str));
                let attribute = pod_attribute(pod);
                ipam.allocate_specific_ip(key, ip, policy, &attribute)
                    .await
                    .map_err(|e| match e {
                        IpamError::KeyMismatch { ip, key, stored_key } => {
                            ControllerError::IpConflict { ip, key, stored_key }
                        }
                        other => ControllerError::Ipam(other),
                    })?;
                info!(store = ipam.name(), key, ip = %ip, policy = %policy, "updated floatingip to key");
                Ok(IpSync::Allocated)
            }
        }
    }

    /// Patches the allocation info annotation onto a pod that lacks it.
    pub(crate) async fn sync_pod_annotation(
        &self,
        key: &str,
        pod: &Pod,
        stats: &mut PassStats,
    ) -> Result<(), ControllerError> {
        if pod.annotations().get(ANNOTATION_IP_INFO).is_some_and(|v| !v.is_empty()) {
            return Ok(());
        }

        let info = self
            .ipam
            .query_first(key)
            .await?
            .ok_or_else(|| ControllerError::NoAllocation(key.to_string()))?;
        let value = serde_json::to_string(&info)?;
        let annotations = BTreeMap::from([(ANNOTATION_IP_INFO.to_string(), value)]);
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let writer = self.writer.as_ref();
        let (namespace, name, annotations) = (namespace.as_str(), name.as_str(), &annotations);

        self.write_backoff
            .poll(|| async move {
                let result = writer.patch_pod_annotations(namespace, name, annotations).await;
                if let Err(e) = &result {
                    warn!("failed to update pod {}: {}", key, e);
                }
                result
            })
            .await
            .map_err(|timeout| ControllerError::AnnotationPatchTimeout {
                pod: key.to_string(),
                attempts: timeout.attempts,
                last_error: timeout.last_error.to_string(),
            })?;

        debug!("updated annotation {} for pod {}", ANNOTATION_IP_INFO, key);
        stats.annotated += 1;
        Ok(())
    }
}

/// Attribute stored with an allocation: the node the pod runs on.
fn pod_attribute(pod: &Pod) -> String {
    let node_name = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_default();
    serde_json::json!({ "NodeName": node_name }).to_string()
}

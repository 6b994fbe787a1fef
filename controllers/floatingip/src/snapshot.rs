//! Per-pass views of the cluster.
//!
//! A [`WorkloadSnapshot`] maps every live owner to its `AppFullName`, a
//! [`PodIndex`] maps every live pod to the key its floating IP is held under.
//! Both are rebuilt from the caches at the start of each pass and dropped at
//! its end.

use crate::cluster::{Lister, Listers};
use crate::config::LabelFilter;
use crate::error::ControllerError;
use crate::keys::{PodKey, app_full_name};
use crate::owner::Owner;
use crds::TApp;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const POD_PHASE_FAILED: &str = "Failed";
const POD_REASON_EVICTED: &str = "Evicted";

/// Live owners that want floating IPs, by `AppFullName`, one map per owner
/// kind.
#[derive(Debug, Default)]
pub struct WorkloadSnapshot {
    pub stateful_sets: HashMap<String, Arc<StatefulSet>>,
    pub deployments: HashMap<String, Arc<Deployment>>,
    pub tapps: HashMap<String, Arc<TApp>>,
}

impl WorkloadSnapshot {
    /// Lists every owner kind matching `wanted`. Any failed list fails the
    /// whole snapshot.
    pub fn build(listers: &Listers, wanted: &LabelFilter) -> Result<Self, ControllerError> {
        Ok(Self {
            stateful_sets: index_owners(listers.stateful_sets.as_ref(), wanted)?,
            deployments: index_owners(listers.deployments.as_ref(), wanted)?,
            tapps: index_owners(listers.tapps.as_ref(), wanted)?,
        })
    }

    /// Name of the live Deployment owning `pod`.
    ///
    /// A Deployment pod has exactly one owner, a ReplicaSet named
    /// `<deployment>-<hash>`.
    pub fn deployment_of(&self, pod: &Pod) -> Option<String> {
        let owners = pod.owner_references();
        let [owner] = owners else {
            return None;
        };
        if owner.kind != "ReplicaSet" {
            return None;
        }
        let (deployment, _) = owner.name.rsplit_once('-')?;
        let namespace = pod.namespace().unwrap_or_default();
        self.deployments
            .contains_key(&app_full_name(&namespace, deployment))
            .then(|| deployment.to_string())
    }

    /// Key the floating IP of `pod` is held under.
    pub fn pod_key(&self, pod: &Pod) -> PodKey {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        match self.deployment_of(pod) {
            Some(deployment) => PodKey::deployment_pod(&namespace, &deployment, &name),
            None => PodKey::plain(&namespace, &name),
        }
    }
}

fn index_owners<K: Owner>(
    lister: &dyn Lister<K>,
    wanted: &LabelFilter,
) -> Result<HashMap<String, Arc<K>>, ControllerError> {
    Ok(lister
        .list(wanted)?
        .into_iter()
        .map(|owner| (owner.app_full_name(), owner))
        .collect())
}

/// Whether the pod was evicted. Evicted pods are never restarted.
pub fn is_evicted(pod: &Pod) -> bool {
    pod.status.as_ref().is_some_and(|status| {
        status.phase.as_deref() == Some(POD_PHASE_FAILED) && status.reason.as_deref() == Some(POD_REASON_EVICTED)
    })
}

/// Pods selected for a pass, with the key each one holds its IP under.
#[derive(Debug, Default)]
pub struct PodIndex {
    pods: Vec<(PodKey, Arc<Pod>)>,
    live: HashSet<String>,
}

impl PodIndex {
    /// Lists pods matching `selector`. Evicted pods are listed but not live.
    pub fn build(
        pods: &dyn Lister<Pod>,
        selector: &LabelFilter,
        snapshot: &WorkloadSnapshot,
    ) -> Result<Self, ControllerError> {
        let mut index = Self::default();
        for pod in pods.list(selector)? {
            let key = snapshot.pod_key(&pod);
            if !is_evicted(&pod) {
                index.live.insert(key.to_string());
            }
            index.pods.push((key, pod));
        }
        Ok(index)
    }

    /// Whether a live pod holds its IP under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.live.contains(key)
    }

    pub fn pods(&self) -> impl Iterator<Item = (&PodKey, &Arc<Pod>)> {
        self.pods.iter().map(|(key, pod)| (key, pod))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_snapshot_indexes_by_app_full_name() {
        let cluster = TestCluster::new();
        cluster.stateful_sets.add(create_test_stateful_set("ns", "app", 2, Some("immutable")));
        cluster.deployments.add(create_test_deployment("ns", "d", 1, None));
        cluster.tapps.add(create_test_tapp("other", "t", 1, None, &[]));

        let snapshot = WorkloadSnapshot::build(&cluster.listers(), &LabelFilter::floating_ip()).unwrap();
        assert!(snapshot.stateful_sets.contains_key("ns_app"));
        assert!(snapshot.deployments.contains_key("ns_d"));
        assert!(snapshot.tapps.contains_key("other_t"));
    }

    #[test]
    fn test_snapshot_list_failure_aborts() {
        let cluster = TestCluster::new();
        cluster.tapps.set_failing(true);
        assert!(matches!(
            WorkloadSnapshot::build(&cluster.listers(), &LabelFilter::floating_ip()),
            Err(ControllerError::List(_))
        ));
    }

    #[test]
    fn test_deployment_of() {
        let cluster = TestCluster::new();
        cluster.deployments.add(create_test_deployment("ns", "d", 1, None));
        let snapshot = WorkloadSnapshot::build(&cluster.listers(), &LabelFilter::floating_ip()).unwrap();

        let pod = with_replica_set_owner(create_test_pod("ns", "d-5f7b9-abc12", None), "d-5f7b9");
        assert_eq!(snapshot.deployment_of(&pod).as_deref(), Some("d"));
        assert_eq!(snapshot.pod_key(&pod).to_string(), "_deployment_ns_d_d-5f7b9-abc12");

        // ReplicaSet of a Deployment that is gone
        let orphan = with_replica_set_owner(create_test_pod("ns", "x-5f7b9-abc12", None), "x-5f7b9");
        assert_eq!(snapshot.deployment_of(&orphan), None);
        assert_eq!(snapshot.pod_key(&orphan).to_string(), "ns_x-5f7b9-abc12");

        let plain = create_test_pod("ns", "app-0", None);
        assert_eq!(snapshot.pod_key(&plain).to_string(), "ns_app-0");
    }

    #[test]
    fn test_snapshot_skips_owners_without_opt_in() {
        let cluster = TestCluster::new();
        cluster.stateful_sets.add(without_network_label(create_test_stateful_set("ns", "app", 2, Some("immutable"))));
        cluster.deployments.add(without_network_label(create_test_deployment("ns", "d", 1, Some("immutable"))));
        cluster.tapps.add(without_network_label(create_test_tapp("ns", "t", 1, Some("immutable"), &[])));
        let snapshot = WorkloadSnapshot::build(&cluster.listers(), &LabelFilter::floating_ip()).unwrap();

        assert!(snapshot.stateful_sets.is_empty());
        assert!(snapshot.deployments.is_empty());
        assert!(snapshot.tapps.is_empty());

        // Pods of an opted-out Deployment hold their IP under a plain key
        let pod = with_replica_set_owner(create_test_pod("ns", "d-5f7b9-abc12", None), "d-5f7b9");
        assert_eq!(snapshot.deployment_of(&pod), None);
        assert_eq!(snapshot.pod_key(&pod).to_string(), "ns_d-5f7b9-abc12");
    }

    #[test]
    fn test_pod_index_treats_evicted_pods_as_absent() {
        let cluster = TestCluster::new();
        cluster.pods.add(create_test_pod("ns", "app-0", Some("10.0.0.5")));
        cluster.pods.add(evicted(create_test_pod("ns", "app-1", Some("10.0.0.6"))));
        let snapshot = WorkloadSnapshot::build(&cluster.listers(), &LabelFilter::floating_ip()).unwrap();

        let index = PodIndex::build(&*cluster.pods, &LabelFilter::floating_ip(), &snapshot).unwrap();
        assert!(index.contains("ns_app-0"));
        assert!(!index.contains("ns_app-1"));
        assert_eq!(index.live_count(), 1);
        assert_eq!(index.pods().count(), 2);
    }

    #[test]
    fn test_is_evicted() {
        let pod = create_test_pod("ns", "app-0", None);
        assert!(!is_evicted(&pod));
        assert!(is_evicted(&evicted(pod)));
    }
}

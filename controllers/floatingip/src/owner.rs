//! Owner workloads of floating IP pods.
//!
//! StatefulSets, Deployments and TApps answer the same questions during
//! reconciliation, so they share one capability trait.

use crate::config::LabelFilter;
use crate::keys::app_full_name;
use crds::{LABEL_RELEASE_POLICY, TApp};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::ResourceExt;

pub trait Owner: ResourceExt {
    /// `<namespace>_<name>`, the join key between allocation keys and owners.
    fn app_full_name(&self) -> String {
        app_full_name(&self.namespace().unwrap_or_default(), &self.name_any())
    }

    /// Whether the owner opted into floating IP networking.
    fn wants_floating_ip(&self, selector: &LabelFilter) -> bool {
        selector.matches(Some(self.labels()))
    }

    fn release_policy_label(&self) -> Option<&str> {
        self.labels().get(LABEL_RELEASE_POLICY).map(String::as_str)
    }

    /// Declared replica count, `None` when left to the API default.
    fn replica_count(&self) -> Option<i32>;

    /// Whether the instance with the given id was explicitly killed.
    fn instance_killed(&self, _instance_id: &str) -> bool {
        false
    }
}

impl Owner for StatefulSet {
    fn replica_count(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|spec| spec.replicas)
    }
}

impl Owner for Deployment {
    fn replica_count(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|spec| spec.replicas)
    }
}

impl Owner for TApp {
    fn replica_count(&self) -> Option<i32> {
        Some(self.spec.replicas)
    }

    fn instance_killed(&self, instance_id: &str) -> bool {
        self.spec
            .statuses
            .get(instance_id)
            .is_some_and(|status| status.is_killed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::InstanceStatus;

    #[test]
    fn test_owner_labels() {
        let ss = create_test_stateful_set("ns", "app", 2, Some("immutable"));
        assert_eq!(ss.app_full_name(), "ns_app");
        assert_eq!(ss.release_policy_label(), Some("immutable"));
        assert_eq!(ss.replica_count(), Some(2));
        assert!(ss.wants_floating_ip(&LabelFilter::floating_ip()));
        assert!(!ss.wants_floating_ip(&LabelFilter::parse("team=other").unwrap()));

        let dp = create_test_deployment("ns", "d", 1, None);
        assert_eq!(dp.release_policy_label(), None);
        assert!(!dp.instance_killed("0"));
    }

    #[test]
    fn test_tapp_instance_killed() {
        let tapp = create_test_tapp(
            "ns",
            "t",
            3,
            Some("immutable"),
            &[("0", InstanceStatus::Running), ("1", InstanceStatus::Killed), ("2", InstanceStatus::Killing)],
        );
        assert!(!tapp.instance_killed("0"));
        assert!(tapp.instance_killed("1"));
        assert!(tapp.instance_killed("2"));
        assert!(!tapp.instance_killed("7"));
        assert_eq!(tapp.replica_count(), Some(3));
    }
}

//! TApp CRD
//!
//! Client-side view of the TApp custom workload (installed by tapp-controller).
//! Only the fields the floating IP controller reads or writes are typed; the pod
//! templates are kept as raw JSON so unknown fields survive a replace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "apps.tkestack.io",
    version = "v1",
    kind = "TApp",
    namespaced,
    status = "TAppStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TAppSpec {
    /// Desired number of instances
    #[serde(default)]
    pub replicas: i32,

    /// Desired state per instance id ("0", "1", ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub statuses: BTreeMap<String, InstanceStatus>,

    /// Default pod template
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub template: serde_json::Value,

    /// Named pod templates referenced from `templates`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub template_pool: BTreeMap<String, serde_json::Value>,

    /// Instance id to template name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TAppStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    /// Observed state per instance id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub statuses: BTreeMap<String, InstanceStatus>,
}

/// State of a single TApp instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum InstanceStatus {
    #[default]
    NotCreated,
    Pending,
    Running,
    Updating,
    PodReady,
    Killing,
    Killed,
    Failed,
    Succ,
    Unknown,
}

impl InstanceStatus {
    /// Whether the instance was explicitly killed (or is being killed).
    pub fn is_killed(self) -> bool {
        matches!(self, InstanceStatus::Killing | InstanceStatus::Killed)
    }
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_status_killed() {
        assert!(InstanceStatus::Killed.is_killed());
        assert!(InstanceStatus::Killing.is_killed());
        assert!(!InstanceStatus::Running.is_killed());
        assert!(!InstanceStatus::default().is_killed());
    }

    #[test]
    fn test_tapp_spec_deserializes_statuses() {
        let spec: TAppSpec = serde_json::from_value(serde_json::json!({
            "replicas": 3,
            "statuses": {"1": "Killed"},
            "template": {"spec": {"containers": [{"name": "app"}]}}
        }))
        .unwrap();
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.statuses.get("1"), Some(&InstanceStatus::Killed));
        assert!(spec.template_pool.is_empty());
    }
}

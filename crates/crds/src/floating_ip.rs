//! FloatingIP CRD
//!
//! One object per allocated floating IP. The object name is the IP address
//! (IPv6 colons replaced by dashes), `spec.key` is the stable pod key holding it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{RELEASE_POLICY_IMMUTABLE, RELEASE_POLICY_NEVER};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "fip.microscaler.io",
    version = "v1alpha1",
    kind = "FloatingIP",
    plural = "floatingips",
    shortname = "fip",
    printcolumn = r#"{"name":"Key","type":"string","jsonPath":".spec.key"}"#,
    printcolumn = r#"{"name":"Policy","type":"string","jsonPath":".spec.policy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPSpec {
    /// Stable key of the pod (or deployment pool) holding this IP
    pub key: String,

    /// Allocation attribute, e.g. the node the pod was scheduled to
    #[serde(default)]
    pub attribute: String,

    /// Release policy
    #[serde(default)]
    pub policy: ReleasePolicy,

    /// Routable (node) subnet this IP belongs to
    #[serde(default)]
    pub subnet: String,

    /// Last allocate or update timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// When an allocated IP may be given back.
///
/// Serializes as PascalCase ("PodDelete", "Immutable", "Never").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ReleasePolicy {
    /// Release as soon as the pod is gone
    #[default]
    PodDelete,

    /// Release only when the owner is deleted or scaled down
    Immutable,

    /// Never released automatically, only re-pooled
    Never,
}

impl ReleasePolicy {
    /// Maps a release policy label value; anything unknown means `PodDelete`.
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            Some(RELEASE_POLICY_IMMUTABLE) => ReleasePolicy::Immutable,
            Some(RELEASE_POLICY_NEVER) => ReleasePolicy::Never,
            _ => ReleasePolicy::PodDelete,
        }
    }
}

impl fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleasePolicy::PodDelete => "PodDelete",
            ReleasePolicy::Immutable => "Immutable",
            ReleasePolicy::Never => "Never",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_policy_from_label() {
        assert_eq!(ReleasePolicy::from_label(Some("immutable")), ReleasePolicy::Immutable);
        assert_eq!(ReleasePolicy::from_label(Some("never")), ReleasePolicy::Never);
        assert_eq!(ReleasePolicy::from_label(Some("Never")), ReleasePolicy::PodDelete);
        assert_eq!(ReleasePolicy::from_label(None), ReleasePolicy::PodDelete);
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let spec = FloatingIPSpec {
            key: "ns_app-0".to_string(),
            attribute: String::new(),
            policy: ReleasePolicy::Never,
            subnet: "10.0.0.0/24".to_string(),
            update_time: None,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["policy"], "Never");
        assert!(value.get("updateTime").is_none());

        let parsed: FloatingIPSpec = serde_json::from_value(serde_json::json!({"key": "ns_a"})).unwrap();
        assert_eq!(parsed.policy, ReleasePolicy::PodDelete);
    }
}

//! Well-known labels, annotations and resource names.

/// API group of the floating IP CRDs.
pub const API_GROUP: &str = "fip.microscaler.io";

/// Label put on owners (and their pod templates) that opted into floating IP networking.
pub const LABEL_NETWORK: &str = "fip.microscaler.io/network";

/// Value of [`LABEL_NETWORK`] meaning "this owner wants floating IPs".
pub const LABEL_VALUE_FLOATING_IP: &str = "floatingip";

/// Label carrying the release policy of an owner or pod.
pub const LABEL_RELEASE_POLICY: &str = "fip.microscaler.io/release-policy";

/// Release only when the owner is deleted or scaled down.
pub const RELEASE_POLICY_IMMUTABLE: &str = "immutable";

/// Never release automatically.
pub const RELEASE_POLICY_NEVER: &str = "never";

/// Pod annotation holding the JSON encoded allocation info of the primary IP.
pub const ANNOTATION_IP_INFO: &str = "fip.microscaler.io/ip-info";

/// Pod annotation holding the JSON encoded allocation info of the secondary IP.
pub const ANNOTATION_SECOND_IP_INFO: &str = "fip.microscaler.io/second-ip-info";

/// Extended resource every floating IP container requests.
pub const RESOURCE_FLOATING_IP: &str = "fip.microscaler.io/floatingip";

/// Prefix shared by every deployment scoped allocation key.
pub const DEPLOYMENT_KEY_PREFIX: &str = "_deployment_";

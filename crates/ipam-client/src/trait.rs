//! FloatingIpamTrait for mocking
//!
//! The controller only talks to the allocation store through this trait. The
//! concrete `CrdIpam` implements it, and tests use `MockIpam`.

use crate::error::IpamError;
use crate::models::*;
use crds::ReleasePolicy;
use std::net::IpAddr;

/// Allocation store operations
///
/// Implementations serialize their own writes: at most one IP per key
/// allocation call and at most one key per IP at any instant.
#[async_trait::async_trait]
pub trait FloatingIpamTrait: Send + Sync {
    /// Name of the store instance, used to tell primary and secondary stores apart in logs
    fn name(&self) -> &str;

    /// All bindings whose key starts with `prefix` (`""` returns everything)
    async fn by_prefix(&self, prefix: &str) -> Result<Vec<FloatingIpRecord>, IpamError>;

    /// Key the IP is bound to, if any
    async fn query_by_ip(&self, ip: IpAddr) -> Result<Option<String>, IpamError>;

    /// Allocation info of the first binding held by `key`
    async fn query_first(&self, key: &str) -> Result<Option<IpInfo>, IpamError>;

    /// First binding held by `key`
    async fn first(&self, key: &str) -> Result<Option<FloatingIpRecord>, IpamError>;

    /// Binds `ip` to `key`. Fails if the IP is bound to another key or outside every range.
    async fn allocate_specific_ip(
        &self,
        key: &str,
        ip: IpAddr,
        policy: ReleasePolicy,
        attribute: &str,
    ) -> Result<(), IpamError>;

    /// Moves the binding of `ip` from `old_key` to `new_key`, keeping IP and policy.
    /// Fails with `KeyMismatch` if `ip` is no longer held by `old_key`.
    async fn update_key(&self, ip: IpAddr, old_key: &str, new_key: &str) -> Result<(), IpamError>;

    /// Releases `ip` held by `key`. `reason` is advisory and only logged.
    /// Fails with `KeyMismatch` if `ip` is no longer held by `key`.
    async fn release(&self, key: &str, ip: IpAddr, reason: &str) -> Result<(), IpamError>;
}

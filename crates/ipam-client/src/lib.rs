//! Floating IP allocation store
//!
//! Keeps the `key -> IP` bindings of floating IPs. Every allocated IP is a
//! cluster-scoped `FloatingIP` object named after the address; the configured
//! floating IP ranges decide which addresses may be allocated and which
//! gateway / vlan / subnet they come with.
//!
//! # Example
//!
//! ```no_run
//! use ipam_client::{CrdIpam, FloatingIpamTrait, FloatingIpRange, ReleasePolicy};
//!
//! # async fn example(client: kube::Client, ranges: Vec<FloatingIpRange>) -> Result<(), Box<dyn std::error::Error>> {
//! let ipam = CrdIpam::new("primary", client, ranges)?;
//!
//! let ip = "10.0.0.5".parse()?;
//! if ipam.query_by_ip(ip).await?.is_none() {
//!     ipam.allocate_specific_ip("default_web-0", ip, ReleasePolicy::Immutable, "").await?;
//! }
//! let info = ipam.query_first("default_web-0").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod ipam_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::CrdIpam;
pub use crds::ReleasePolicy;
pub use error::IpamError;
pub use ipam_trait::FloatingIpamTrait;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockIpam, MockWrite};

//! Floating IP CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the floating IP
//! controller and the allocation store:
//! - `FloatingIP`: one allocated floating IP (cluster-scoped, named by the IP)
//! - `TApp`: the custom workload whose instances keep their IPs across restarts

pub mod constants;
pub mod floating_ip;
pub mod tapp;

pub use constants::*;
pub use floating_ip::*;
pub use tapp::*;

//! Allocation store errors

use std::net::IpAddr;
use thiserror::Error;

/// Errors that can occur when reading or writing floating IP bindings
#[derive(Debug, Error)]
pub enum IpamError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No binding found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The IP is bound to a different key than the caller expected
    #[error("IP {ip} is bound to {stored_key}, not {key}")]
    KeyMismatch {
        ip: IpAddr,
        key: String,
        stored_key: String,
    },

    /// The IP is not inside any configured floating IP range
    #[error("IP {0} is not in any floating IP range")]
    OutOfRange(IpAddr),

    /// Invalid floating IP range configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stored object could not be mapped to a binding
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

//! Controller-specific error types.
//!
//! This module defines error types specific to the Floating IP Controller
//! that are not covered by upstream library errors.

use ipam_client::IpamError;
use kube::Error as KubeError;
use std::net::IpAddr;
use thiserror::Error;

/// Errors that can occur in the Floating IP Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Allocation store read or write error
    #[error("IPAM error: {0}")]
    Ipam(#[from] IpamError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Floating IP ConfigMap could not be parsed
    #[error("Invalid floating IP ranges: {0}")]
    InvalidRanges(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Allocation key that none of the key parsers understand
    #[error("Malformed allocation key: {0:?}")]
    MalformedKey(String),

    /// Listing from an informer cache failed
    #[error("Failed to list {0}")]
    List(String),

    /// The same IP is observed on a pod but bound to another key
    #[error("Conflict: ip {ip} found for both {key} and {stored_key}")]
    IpConflict {
        ip: IpAddr,
        key: String,
        stored_key: String,
    },

    /// Annotation could not be patched within the retry budget
    #[error("Timed out patching annotation of pod {pod} after {attempts} attempts: {last_error}")]
    AnnotationPatchTimeout {
        pod: String,
        attempts: u32,
        last_error: String,
    },

    /// A pod annotation could not be decoded
    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    /// No allocation exists for a key that should have one
    #[error("No allocation found for {0}")]
    NoAllocation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

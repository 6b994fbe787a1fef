//! Floating IP Controller
//!
//! Keeps floating IP bindings convergent with the pods of the cluster:
//! - releases (or re-pools into their Deployment) the IPs of pods that are gone
//! - records IPs of running pods the store never saw
//! - repairs the allocation info annotation of pods missing it
//! - makes TApp templates request the floating IP extended resource
//!
//! Reconciliation runs as a periodic full resync over reflector caches.

mod backoff;
mod cluster;
mod config;
mod controller;
mod error;
mod keys;
mod owner;
mod reconciler;
mod snapshot;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Floating IP Controller");

    // Load configuration from environment variables
    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  ConfigMap: {}/{}", config.configmap_namespace, config.configmap_name);
    info!("  Pod selector: {}", config.pod_selector);
    info!("  Wanted selector: {}", config.wanted_selector);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

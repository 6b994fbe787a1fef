//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the allocation
//! stores, the reflector caches and the reconciler together, and drives the
//! periodic resync.

use crate::cluster::KubeWriter;
use crate::config::{Config, parse_ranges};
use crate::error::ControllerError;
use crate::reconciler::{PassOutcome, Reconciler};
use crate::watcher::Reflectors;
use ipam_client::{CrdIpam, FloatingIpRange, FloatingIpamTrait};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const PRIMARY_STORE: &str = "floatingip";
const SECOND_STORE: &str = "second-floatingip";

/// Main controller for floating IP bindings.
pub struct Controller {
    pod_reflector: JoinHandle<Result<(), ControllerError>>,
    stateful_set_reflector: JoinHandle<Result<(), ControllerError>>,
    deployment_reflector: JoinHandle<Result<(), ControllerError>>,
    tapp_reflector: JoinHandle<Result<(), ControllerError>>,
    resync_loop: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Floating IP Controller");

        let client = Client::try_default().await?;

        let (ranges, second_ranges) = load_ranges(&client, &config).await?;
        if ranges.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "no floating ip ranges under key {} of configmap {}/{}",
                config.floatingip_key, config.configmap_namespace, config.configmap_name
            )));
        }
        info!("Loaded {} floating IP ranges", ranges.len());
        let ipam: Arc<dyn FloatingIpamTrait> = Arc::new(CrdIpam::new(PRIMARY_STORE, client.clone(), ranges)?);

        let reflectors = Reflectors::start(client.clone(), &config);
        let writer = Arc::new(KubeWriter::new(client.clone()));
        let mut reconciler = Reconciler::new(ipam, reflectors.listers.clone(), writer, &config);

        if second_ranges.is_empty() {
            info!("No secondary floating IP ranges configured, secondary store disabled");
        } else {
            info!("Loaded {} secondary floating IP ranges", second_ranges.len());
            reconciler = reconciler.with_second_ipam(Arc::new(CrdIpam::new(SECOND_STORE, client, second_ranges)?));
        }

        let resync_loop = tokio::spawn(resync_loop(reconciler, config.resync_interval));

        Ok(Self {
            pod_reflector: reflectors.pods,
            stateful_set_reflector: reflectors.stateful_sets,
            deployment_reflector: reflectors.deployments,
            tapp_reflector: reflectors.tapps,
            resync_loop,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Floating IP Controller running");

        // Background tasks run forever; any of them exiting stops the controller
        tokio::select! {
            result = &mut self.pod_reflector => {
                result.map_err(|e| ControllerError::Watch(format!("Pod reflector panicked: {}", e)))??;
            }
            result = &mut self.stateful_set_reflector => {
                result.map_err(|e| ControllerError::Watch(format!("StatefulSet reflector panicked: {}", e)))??;
            }
            result = &mut self.deployment_reflector => {
                result.map_err(|e| ControllerError::Watch(format!("Deployment reflector panicked: {}", e)))??;
            }
            result = &mut self.tapp_reflector => {
                result.map_err(|e| ControllerError::Watch(format!("TApp reflector panicked: {}", e)))??;
            }
            result = &mut self.resync_loop => {
                result.map_err(|e| ControllerError::Watch(format!("Resync loop panicked: {}", e)))??;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
            }
        }

        info!("Floating IP Controller stopped");
        Ok(())
    }
}

/// Reads the primary and secondary ranges from the floating IP ConfigMap.
async fn load_ranges(
    client: &Client,
    config: &Config,
) -> Result<(Vec<FloatingIpRange>, Vec<FloatingIpRange>), ControllerError> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &config.configmap_namespace);
    let configmap = api.get(&config.configmap_name).await.map_err(|e| {
        error!(
            "Failed to read configmap {}/{}: {}",
            config.configmap_namespace, config.configmap_name, e
        );
        ControllerError::Kube(e)
    })?;
    let data = configmap.data.unwrap_or_default();

    let ranges = match data.get(&config.floatingip_key) {
        Some(raw) => parse_ranges(raw)?,
        None => Vec::new(),
    };
    let second_ranges = match data.get(&config.second_floatingip_key) {
        Some(raw) => parse_ranges(raw)?,
        None => Vec::new(),
    };
    Ok((ranges, second_ranges))
}

/// Runs a pass every `interval`. Passes never overlap; a slow pass delays
/// the next tick instead of queueing up missed ones.
async fn resync_loop(reconciler: Reconciler, interval: Duration) -> Result<(), ControllerError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match reconciler.resync().await {
            Ok(PassOutcome::Completed(stats)) => {
                info!(
                    released = stats.released,
                    rekeyed = stats.rekeyed,
                    allocated = stats.allocated,
                    annotated = stats.annotated,
                    conflicts = stats.conflicts,
                    tapps_updated = stats.tapps_updated,
                    failures = stats.failures,
                    "resync completed"
                );
            }
            Ok(PassOutcome::CacheNotReady) => {
                info!("Caches not ready, resync skipped");
            }
            Err(e) => {
                warn!("Resync aborted: {}", e);
            }
        }
    }
}

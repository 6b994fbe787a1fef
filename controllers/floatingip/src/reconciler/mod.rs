//! Reconciliation of floating IP bindings with the cluster.
//!
//! One pass is organized in three steps:
//! - `release`: drops or re-pools bindings whose pod is gone
//! - `sync`: records bindings of running pods and repairs their annotations
//! - `tapp_resource`: makes TApp templates request the floating IP resource

mod release;
mod sync;
mod tapp_resource;


use crate::backoff::PollBackoff;
use crate::cluster::{ClusterWriter, Listers};
use crate::config::{Config, LabelFilter};
use crate::error::ControllerError;
use crate::snapshot::{PodIndex, WorkloadSnapshot};
use ipam_client::FloatingIpamTrait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Why a binding was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// No live owner exists for the key
    ParentAppNotExist,
    /// The owner does not keep IPs of deleted pods
    IPMutablePod,
    /// The Deployment pool is larger than the Deployment
    ScaledDownDeploymentPod,
    /// The owner no longer asks for floating IPs
    LabelSelectorMismatch,
    /// The TApp instance was killed
    KilledInstance,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseReason::ParentAppNotExist => "ParentAppNotExist",
            ReleaseReason::IPMutablePod => "IPMutablePod",
            ReleaseReason::ScaledDownDeploymentPod => "ScaledDownDeploymentPod",
            ReleaseReason::LabelSelectorMismatch => "LabelSelectorMismatch",
            ReleaseReason::KilledInstance => "KilledInstance",
        };
        f.write_str(s)
    }
}

/// Mutations made during one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub released: usize,
    pub rekeyed: usize,
    pub allocated: usize,
    pub annotated: usize,
    pub conflicts: usize,
    pub tapps_updated: usize,
    pub failures: usize,
}

impl PassStats {
    pub fn mutations(&self) -> usize {
        self.released + self.rekeyed + self.allocated + self.annotated + self.tapps_updated
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassStats),
    /// Some cache has not finished its initial list; nothing was done.
    CacheNotReady,
}

/// Keeps floating IP stores convergent with the pods of the cluster.
pub struct Reconciler {
    pub(crate) ipam: Arc<dyn FloatingIpamTrait>,
    pub(crate) second_ipam: Option<Arc<dyn FloatingIpamTrait>>,
    pub(crate) listers: Listers,
    pub(crate) writer: Arc<dyn ClusterWriter>,
    pub(crate) wanted_selector: LabelFilter,
    pub(crate) pod_selector: LabelFilter,
    pub(crate) namespace: Option<String>,
    pub(crate) write_backoff: PollBackoff,
}

impl Reconciler {
    pub fn new(
        ipam: Arc<dyn FloatingIpamTrait>,
        listers: Listers,
        writer: Arc<dyn ClusterWriter>,
        config: &Config,
    ) -> Self {
        Self {
            ipam,
            second_ipam: None,
            listers,
            writer,
            wanted_selector: config.wanted_selector.clone(),
            pod_selector: config.pod_selector.clone(),
            namespace: config.namespace.clone(),
            write_backoff: PollBackoff::new(config.annotation_patch_interval, config.annotation_patch_timeout),
        }
    }

    /// Also reconcile a secondary store, fed from the second IP annotation.
    pub fn with_second_ipam(mut self, ipam: Arc<dyn FloatingIpamTrait>) -> Self {
        self.second_ipam = Some(ipam);
        self
    }

    /// Runs one full pass.
    ///
    /// Nothing is done until every cache has synced. Every store is read
    /// before the caches are listed. Failing to list from a cache or to read
    /// a store aborts the pass; failed writes are logged and left to the next
    /// pass.
    pub async fn resync(&self) -> Result<PassOutcome, ControllerError> {
        if !self.listers.has_synced() {
            debug!("Caches not synced yet, skipping resync");
            return Ok(PassOutcome::CacheNotReady);
        }

        // Stores are read before the caches: a binding made after this point
        // must not be judged against a pod listing that predates it.
        let mut listings = Vec::new();
        for ipam in self.stores() {
            let records = ipam.by_prefix("").await?;
            listings.push((ipam, records));
        }

        let snapshot = WorkloadSnapshot::build(&self.listers, &self.wanted_selector)?;
        let pods = PodIndex::build(self.listers.pods.as_ref(), &self.pod_selector, &snapshot)?;
        debug!(
            stateful_sets = snapshot.stateful_sets.len(),
            deployments = snapshot.deployments.len(),
            tapps = snapshot.tapps.len(),
            live_pods = pods.live_count(),
            "built workload snapshot"
        );
        let mut stats = PassStats::default();

        for (ipam, records) in listings {
            info!("[{}] resync pods", ipam.name());
            self.release_orphans(ipam, records, &pods, &snapshot, &mut stats).await;
        }

        info!("sync pod ips into store");
        self.sync_pod_ips(&pods, &mut stats).await;

        self.sync_tapp_resources(&mut stats).await?;

        Ok(PassOutcome::Completed(stats))
    }

    fn stores(&self) -> Vec<&dyn FloatingIpamTrait> {
        let mut stores: Vec<&dyn FloatingIpamTrait> = vec![self.ipam.as_ref()];
        stores.extend(self.second_ipam.as_deref());
        stores
    }

    /// Whether keys of this namespace are reconciled by this instance.
    pub(crate) fn in_scope(&self, namespace: &str) -> bool {
        self.namespace.as_deref().is_none_or(|ns| ns == namespace)
    }
}

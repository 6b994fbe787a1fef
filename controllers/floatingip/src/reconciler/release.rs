//! Release of bindings whose pod is gone.
//!
//! The pod of an orphaned binding can't be inspected, so the decision is
//! taken from its owner: StatefulSets and TApps keep the IPs of instances
//! that will come back, Deployments keep a pool sized to their replicas.

use super::{PassStats, ReleaseReason, Reconciler};
use crate::error::ControllerError;
use crate::keys::PodKey;
use crate::owner::Owner;
use crate::snapshot::{PodIndex, WorkloadSnapshot};
use crds::{RELEASE_POLICY_IMMUTABLE, RELEASE_POLICY_NEVER, ReleasePolicy};
use ipam_client::{FloatingIpRecord, FloatingIpamTrait};
use kube::ResourceExt;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// What to do with one orphaned binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Keep,
    Release(ReleaseReason),
    Rekey(String),
}

/// Bindings held under each Deployment pool, counted from the store listing
/// of the pass and kept current as the pass releases bindings.
#[derive(Debug, Default)]
pub(crate) struct DeploymentPools {
    sizes: HashMap<String, usize>,
}

impl DeploymentPools {
    pub(crate) fn count(records: &[FloatingIpRecord]) -> Self {
        let mut sizes = HashMap::new();
        for prefix in records.iter().filter_map(|record| pool_of(&record.key)) {
            *sizes.entry(prefix).or_insert(0) += 1;
        }
        Self { sizes }
    }

    pub(crate) fn size(&self, prefix: &str) -> usize {
        self.sizes.get(prefix).copied().unwrap_or(0)
    }

    fn released(&mut self, key: &str) {
        if let Some(size) = pool_of(key).and_then(|prefix| self.sizes.get_mut(&prefix)) {
            *size = size.saturating_sub(1);
        }
    }
}

fn pool_of(key: &str) -> Option<String> {
    PodKey::parse(key)?.to_deployment_prefix().map(|prefix| prefix.to_string())
}

impl Reconciler {
    /// Releases or re-pools every binding of `records` whose pod is not live.
    ///
    /// `records` is the listing of `ipam` taken at the start of the pass.
    pub(crate) async fn release_orphans(
        &self,
        ipam: &dyn FloatingIpamTrait,
        records: Vec<FloatingIpRecord>,
        pods: &PodIndex,
        snapshot: &WorkloadSnapshot,
        stats: &mut PassStats,
    ) {
        let mut pools = DeploymentPools::count(&records);
        for record in records {
            if record.key.is_empty() || pods.contains(&record.key) {
                continue;
            }
            let Some(key) = PodKey::parse(&record.key) else {
                warn!(
                    "[{}] {}",
                    ipam.name(),
                    ControllerError::MalformedKey(record.key.clone())
                );
                continue;
            };
            if !self.in_scope(key.namespace()) {
                continue;
            }

            let decision = if record.policy == ReleasePolicy::Never {
                never_release(&record, &key)
            } else {
                self.decide(ipam, &record, &key, snapshot, &pools).await
            };
            let releasing = matches!(decision, Decision::Release(_));
            if self.apply(ipam, &record, decision, stats).await && releasing {
                pools.released(&record.key);
            }
        }
    }

    /// Decision for an orphaned binding that may be released.
    pub(crate) async fn decide(
        &self,
        ipam: &dyn FloatingIpamTrait,
        record: &FloatingIpRecord,
        key: &PodKey,
        snapshot: &WorkloadSnapshot,
        pools: &DeploymentPools,
    ) -> Decision {
        let Some(app) = key.app_full_name() else {
            warn!("[{}] {}", ipam.name(), ControllerError::MalformedKey(record.key.clone()));
            return Decision::Keep;
        };

        if !key.is_deployment() {
            if let Some(ss) = snapshot.stateful_sets.get(&app) {
                return self.decide_stateful_set(&**ss, key);
            }
        }

        if key.is_deployment() {
            let prefix = match key.to_deployment_prefix() {
                Some(prefix) => prefix.to_string(),
                None => return Decision::Keep,
            };
            return match snapshot.deployments.get(&app) {
                Some(dp) => self.decide_deployment(&**dp, record, &prefix, pools.size(&prefix)),
                None => decide_deleted_deployment(ipam, record, &prefix).await,
            };
        }

        let Some(tapp) = snapshot.tapps.get(&app) else {
            return Decision::Release(ReleaseReason::ParentAppNotExist);
        };
        self.decide_tapp(&**tapp, key)
    }

    fn decide_stateful_set<O: Owner>(&self, ss: &O, key: &PodKey) -> Decision {
        if !ss.wants_floating_ip(&self.wanted_selector) {
            return Decision::Release(ReleaseReason::LabelSelectorMismatch);
        }
        if ss.release_policy_label() != Some(RELEASE_POLICY_IMMUTABLE) {
            return Decision::Release(ReleaseReason::IPMutablePod);
        }
        let Some(index) = key.pod_index() else {
            error!("invalid pod name {} of statefulset {}", key, ss.name_any());
            return Decision::Keep;
        };
        match ss.replica_count() {
            Some(replicas) if i64::from(replicas) < i64::from(index) + 1 => Decision::Release(ReleaseReason::IPMutablePod),
            _ => Decision::Keep,
        }
    }

    fn decide_deployment<O: Owner>(&self, dp: &O, record: &FloatingIpRecord, prefix: &str, pool_size: usize) -> Decision {
        if !dp.wants_floating_ip(&self.wanted_selector) {
            return Decision::Release(ReleaseReason::LabelSelectorMismatch);
        }
        let policy = dp.release_policy_label();
        if policy != Some(RELEASE_POLICY_IMMUTABLE) && policy != Some(RELEASE_POLICY_NEVER) {
            return Decision::Release(ReleaseReason::IPMutablePod);
        }

        // Kubernetes defaults an unset replica count to one
        let replicas = i64::from(dp.replica_count().unwrap_or(1));
        if replicas < pool_size as i64 && policy == Some(RELEASE_POLICY_IMMUTABLE) {
            Decision::Release(ReleaseReason::ScaledDownDeploymentPod)
        } else if record.key != prefix {
            Decision::Rekey(prefix.to_string())
        } else {
            Decision::Keep
        }
    }

    fn decide_tapp<O: Owner>(&self, tapp: &O, key: &PodKey) -> Decision {
        if !tapp.wants_floating_ip(&self.wanted_selector) {
            return Decision::Release(ReleaseReason::LabelSelectorMismatch);
        }
        if tapp.release_policy_label() != Some(RELEASE_POLICY_IMMUTABLE) {
            return Decision::Release(ReleaseReason::IPMutablePod);
        }
        match key.instance_id() {
            Some(id) if tapp.instance_killed(id) => Decision::Release(ReleaseReason::KilledInstance),
            _ => Decision::Keep,
        }
    }

    async fn apply(&self, ipam: &dyn FloatingIpamTrait, record: &FloatingIpRecord, decision: Decision, stats: &mut PassStats) -> bool {
        match decision {
            Decision::Keep => {
                debug!("[{}] keeping {} of {}", ipam.name(), record.ip, record.key);
                false
            }
            Decision::Release(reason) => {
                match ipam.release(&record.key, record.ip, &reason.to_string()).await {
                    Ok(()) => {
                        info!(
                            store = ipam.name(),
                            key = %record.key,
                            ip = %record.ip,
                            reason = %reason,
                            "released floating ip"
                        );
                        stats.released += 1;
                        true
                    }
                    Err(e) => {
                        warn!(
                            store = ipam.name(),
                            key = %record.key,
                            ip = %record.ip,
                            reason = %reason,
                            "failed to release floating ip: {}",
                            e
                        );
                        stats.failures += 1;
                        false
                    }
                }
            }
            Decision::Rekey(new_key) => match ipam.update_key(record.ip, &record.key, &new_key).await {
                Ok(()) => {
                    info!(
                        store = ipam.name(),
                        key = %record.key,
                        ip = %record.ip,
                        new_key = %new_key,
                        "reserved floating ip for deployment"
                    );
                    stats.rekeyed += 1;
                    true
                }
                Err(e) => {
                    error!(
                        store = ipam.name(),
                        key = %record.key,
                        ip = %record.ip,
                        "failed to reserve floating ip for {}: {}",
                        new_key,
                        e
                    );
                    stats.failures += 1;
                    false
                }
            },
        }
    }
}

/// `Never` bindings are only ever moved back into their Deployment pool.
fn never_release(record: &FloatingIpRecord, key: &PodKey) -> Decision {
    match key {
        PodKey::DeploymentPod { .. } => match key.to_deployment_prefix() {
            Some(prefix) if prefix.to_string() != record.key => Decision::Rekey(prefix.to_string()),
            _ => Decision::Keep,
        },
        _ => Decision::Keep,
    }
}

/// Binding under a Deployment key whose Deployment is gone.
async fn decide_deleted_deployment(ipam: &dyn FloatingIpamTrait, record: &FloatingIpRecord, prefix: &str) -> Decision {
    // The record may have changed since the store was listed
    let policy = match ipam.first(&record.key).await {
        Ok(Some(fresh)) if fresh.ip == record.ip => fresh.policy,
        Ok(Some(_)) => record.policy,
        Ok(None) => return Decision::Keep,
        Err(e) => {
            error!("[{}] failed get key {}: {}", ipam.name(), record.key, e);
            return Decision::Keep;
        }
    };
    if policy == ReleasePolicy::Never {
        if record.key == prefix {
            Decision::Keep
        } else {
            Decision::Rekey(prefix.to_string())
        }
    } else {
        Decision::Release(ReleaseReason::IPMutablePod)
    }
}

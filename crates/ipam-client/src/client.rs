//! FloatingIP custom resource backed allocation store.
//!
//! Each binding is one cluster-scoped `FloatingIP` object named after the IP,
//! so the API server itself guarantees at most one key per IP: a second create
//! for the same address fails. Writes from this process are additionally
//! serialized by a mutex, and updates/deletes carry the observed
//! `resourceVersion` so a concurrent writer makes them fail instead of
//! clobbering each other.

use crate::error::IpamError;
use crate::ipam_trait::FloatingIpamTrait;
use crate::models::*;
use crds::{FloatingIP, FloatingIPSpec, ReleasePolicy};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Client, ResourceExt};
use std::net::IpAddr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Allocation store over `FloatingIP` objects.
pub struct CrdIpam {
    name: String,
    api: Api<FloatingIP>,
    ranges: Vec<FloatingIpRange>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for CrdIpam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrdIpam")
            .field("name", &self.name)
            .field("ranges", &self.ranges.len())
            .finish()
    }
}

impl CrdIpam {
    /// Creates a store named `name` allocating from `ranges`.
    pub fn new(name: impl Into<String>, client: Client, ranges: Vec<FloatingIpRange>) -> Result<Self, IpamError> {
        for range in &ranges {
            range.validate()?;
        }
        Ok(Self {
            name: name.into(),
            api: Api::all(client),
            ranges,
            write_lock: Mutex::new(()),
        })
    }

    pub fn ranges(&self) -> &[FloatingIpRange] {
        &self.ranges
    }

    async fn get(&self, ip: IpAddr) -> Result<Option<FloatingIP>, IpamError> {
        Ok(self.api.get_opt(&object_name(ip)).await?)
    }

    /// Records of this store. Several stores share the `FloatingIP` kind and
    /// are told apart by their ranges.
    async fn list_records(&self) -> Result<Vec<FloatingIpRecord>, IpamError> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(records_in(&self.name, &list.items, &self.ranges))
    }

    fn owns(&self, ip: IpAddr) -> bool {
        find_range(&self.ranges, ip).is_some()
    }

    /// Reads the object at `ip` and checks it is still held by `key`.
    async fn get_held_by(&self, ip: IpAddr, key: &str) -> Result<Option<FloatingIP>, IpamError> {
        match self.get(ip).await? {
            Some(obj) if obj.spec.key == key => Ok(Some(obj)),
            Some(obj) => Err(IpamError::KeyMismatch {
                ip,
                key: key.to_string(),
                stored_key: obj.spec.key,
            }),
            None => Ok(None),
        }
    }
}

/// Object name for an IP. Colons are not allowed in object names, and a
/// name may not start or end with a dash, so IPv6 groups are written out in
/// full.
pub fn object_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => v6
            .segments()
            .iter()
            .map(|segment| format!("{:04x}", segment))
            .collect::<Vec<_>>()
            .join("-"),
    }
}

/// Inverse of [`object_name`].
pub fn ip_from_object_name(name: &str) -> Result<IpAddr, IpamError> {
    name.replace('-', ":")
        .parse()
        .map_err(|e| IpamError::InvalidRecord(format!("object name {:?} is not an IP: {}", name, e)))
}

fn to_record(obj: &FloatingIP) -> Result<FloatingIpRecord, IpamError> {
    Ok(FloatingIpRecord {
        key: obj.spec.key.clone(),
        ip: ip_from_object_name(&obj.name_any())?,
        policy: obj.spec.policy,
        subnet: obj.spec.subnet.clone(),
        attribute: obj.spec.attribute.clone(),
        update_time: obj.spec.update_time,
    })
}

/// Records of the objects whose IP falls in `ranges`. Objects that don't
/// decode are logged and skipped.
fn records_in(store: &str, objects: &[FloatingIP], ranges: &[FloatingIpRange]) -> Vec<FloatingIpRecord> {
    objects
        .iter()
        .filter_map(|obj| match to_record(obj) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("[{}] skipping floating ip object {}: {}", store, obj.name_any(), e);
                None
            }
        })
        .filter(|record| find_range(ranges, record.ip).is_some())
        .collect()
}

#[async_trait::async_trait]
impl FloatingIpamTrait for CrdIpam {
    fn name(&self) -> &str {
        &self.name
    }

    async fn by_prefix(&self, prefix: &str) -> Result<Vec<FloatingIpRecord>, IpamError> {
        let mut records = self.list_records().await?;
        records.retain(|record| record.key.starts_with(prefix));
        Ok(records)
    }

    async fn query_by_ip(&self, ip: IpAddr) -> Result<Option<String>, IpamError> {
        if !self.owns(ip) {
            return Ok(None);
        }
        Ok(self.get(ip).await?.map(|obj| obj.spec.key))
    }

    async fn query_first(&self, key: &str) -> Result<Option<IpInfo>, IpamError> {
        let Some(record) = self.first(key).await? else {
            return Ok(None);
        };
        let range = find_range(&self.ranges, record.ip).ok_or(IpamError::OutOfRange(record.ip))?;
        range.ip_info(record.ip).map(Some)
    }

    async fn first(&self, key: &str) -> Result<Option<FloatingIpRecord>, IpamError> {
        Ok(self.list_records().await?.into_iter().find(|record| record.key == key))
    }

    async fn allocate_specific_ip(
        &self,
        key: &str,
        ip: IpAddr,
        policy: ReleasePolicy,
        attribute: &str,
    ) -> Result<(), IpamError> {
        let _guard = self.write_lock.lock().await;
        let range = find_range(&self.ranges, ip).ok_or(IpamError::OutOfRange(ip))?;

        let obj = FloatingIP::new(
            &object_name(ip),
            FloatingIPSpec {
                key: key.to_string(),
                attribute: attribute.to_string(),
                policy,
                subnet: range.routable_subnet.to_string(),
                update_time: Some(chrono::Utc::now()),
            },
        );

        match self.api.create(&PostParams::default(), &obj).await {
            Ok(_) => {
                info!("[{}] allocated {} to {} (policy {})", self.name, ip, key, policy);
                Ok(())
            }
            Err(create_err) => {
                // A create racing another writer fails with a conflict; what matters is who holds the IP now.
                match self.get(ip).await? {
                    Some(existing) if existing.spec.key == key => {
                        debug!("[{}] {} already allocated to {}", self.name, ip, key);
                        Ok(())
                    }
                    Some(existing) => Err(IpamError::KeyMismatch {
                        ip,
                        key: key.to_string(),
                        stored_key: existing.spec.key,
                    }),
                    None => Err(IpamError::Kube(create_err)),
                }
            }
        }
    }

    async fn update_key(&self, ip: IpAddr, old_key: &str, new_key: &str) -> Result<(), IpamError> {
        let _guard = self.write_lock.lock().await;
        let obj = self
            .get_held_by(ip, old_key)
            .await?
            .ok_or_else(|| IpamError::NotFound(format!("{} held by {}", ip, old_key)))?;

        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "spec": {
                "key": new_key,
                "updateTime": chrono::Utc::now(),
            }
        });
        self.api
            .patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("[{}] moved {} from {} to {}", self.name, ip, old_key, new_key);
        Ok(())
    }

    async fn release(&self, key: &str, ip: IpAddr, reason: &str) -> Result<(), IpamError> {
        let _guard = self.write_lock.lock().await;
        let Some(obj) = self.get_held_by(ip, key).await? else {
            debug!("[{}] {} of {} already released", self.name, ip, key);
            return Ok(());
        };

        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: obj.resource_version(),
                uid: obj.uid(),
            }),
            ..DeleteParams::default()
        };
        self.api.delete(&obj.name_any(), &params).await?;
        info!("[{}] released {} of {}, reason {}", self.name, ip, key, reason);
        Ok(())
    }
}

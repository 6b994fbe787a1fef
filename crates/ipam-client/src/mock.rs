//! Mock allocation store for unit testing
//!
//! This module provides an in-memory implementation of FloatingIpamTrait that
//! can be used in unit tests without a Kubernetes API server.

use crate::error::IpamError;
use crate::ipam_trait::FloatingIpamTrait;
use crate::models::*;
use crds::ReleasePolicy;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// A write observed by the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockWrite {
    Allocate { key: String, ip: IpAddr },
    UpdateKey { ip: IpAddr, old_key: String, new_key: String },
    Release { key: String, ip: IpAddr, reason: String },
}

/// Mock allocation store for testing
///
/// Bindings live in memory; writes can be made to fail per key to exercise
/// the best-effort paths of the controller.
#[derive(Clone, Debug)]
pub struct MockIpam {
    name: String,
    ranges: Vec<FloatingIpRange>,
    records: Arc<Mutex<BTreeMap<IpAddr, FloatingIpRecord>>>,
    writes: Arc<Mutex<Vec<MockWrite>>>,
    prefix_reads: Arc<Mutex<Vec<String>>>,
    failing_keys: Arc<Mutex<HashSet<String>>>,
}

impl MockIpam {
    /// Create a new mock store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ranges: Vec::new(),
            records: Arc::new(Mutex::new(BTreeMap::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            prefix_reads: Arc::new(Mutex::new(Vec::new())),
            failing_keys: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Ranges used by `query_first` and the range check of `allocate_specific_ip`.
    /// Without ranges every IP is allocatable and `query_first` reports a /32 (or /128).
    pub fn with_ranges(mut self, ranges: Vec<FloatingIpRange>) -> Self {
        self.ranges = ranges;
        self
    }

    /// Add a binding (for test setup, not recorded as a write)
    pub fn insert(&self, key: &str, ip: IpAddr, policy: ReleasePolicy) {
        self.records.lock().unwrap().insert(
            ip,
            FloatingIpRecord {
                key: key.to_string(),
                ip,
                policy,
                subnet: String::new(),
                attribute: String::new(),
                update_time: None,
            },
        );
    }

    /// Make every write touching `key` fail
    pub fn fail_writes_for(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    /// Let writes touching `key` succeed again
    pub fn clear_failures(&self) {
        self.failing_keys.lock().unwrap().clear();
    }

    /// Current binding of an IP
    pub fn key_of(&self, ip: IpAddr) -> Option<String> {
        self.records.lock().unwrap().get(&ip).map(|r| r.key.clone())
    }

    /// Snapshot of all bindings
    pub fn records(&self) -> Vec<FloatingIpRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    /// All successful writes so far
    pub fn writes(&self) -> Vec<MockWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Prefixes passed to `by_prefix`, in call order
    pub fn prefix_reads(&self) -> Vec<String> {
        self.prefix_reads.lock().unwrap().clone()
    }

    /// Forget recorded writes, keeping the bindings
    pub fn reset_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn check_failure(&self, key: &str) -> Result<(), IpamError> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(IpamError::InvalidRecord(format!("injected write failure for {}", key)));
        }
        Ok(())
    }

    fn check_held_by(records: &BTreeMap<IpAddr, FloatingIpRecord>, ip: IpAddr, key: &str) -> Result<bool, IpamError> {
        match records.get(&ip) {
            Some(record) if record.key == key => Ok(true),
            Some(record) => Err(IpamError::KeyMismatch {
                ip,
                key: key.to_string(),
                stored_key: record.key.clone(),
            }),
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl FloatingIpamTrait for MockIpam {
    fn name(&self) -> &str {
        &self.name
    }

    async fn by_prefix(&self, prefix: &str) -> Result<Vec<FloatingIpRecord>, IpamError> {
        self.prefix_reads.lock().unwrap().push(prefix.to_string());
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn query_by_ip(&self, ip: IpAddr) -> Result<Option<String>, IpamError> {
        Ok(self.key_of(ip))
    }

    async fn query_first(&self, key: &str) -> Result<Option<IpInfo>, IpamError> {
        let Some(record) = self.first(key).await? else {
            return Ok(None);
        };
        if self.ranges.is_empty() {
            let host = ipnet::IpNet::from(record.ip);
            return Ok(Some(IpInfo {
                ip: host,
                vlan: 0,
                gateway: None,
                routable_subnet: host,
            }));
        }
        let range = find_range(&self.ranges, record.ip).ok_or(IpamError::OutOfRange(record.ip))?;
        range.ip_info(record.ip).map(Some)
    }

    async fn first(&self, key: &str) -> Result<Option<FloatingIpRecord>, IpamError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.key == key)
            .cloned())
    }

    async fn allocate_specific_ip(
        &self,
        key: &str,
        ip: IpAddr,
        policy: ReleasePolicy,
        attribute: &str,
    ) -> Result<(), IpamError> {
        self.check_failure(key)?;
        let subnet = if self.ranges.is_empty() {
            String::new()
        } else {
            find_range(&self.ranges, ip)
                .ok_or(IpamError::OutOfRange(ip))?
                .routable_subnet
                .to_string()
        };
        let mut records = self.records.lock().unwrap();
        if Self::check_held_by(&records, ip, key)? {
            return Ok(());
        }
        records.insert(
            ip,
            FloatingIpRecord {
                key: key.to_string(),
                ip,
                policy,
                subnet,
                attribute: attribute.to_string(),
                update_time: Some(chrono::Utc::now()),
            },
        );
        self.writes.lock().unwrap().push(MockWrite::Allocate {
            key: key.to_string(),
            ip,
        });
        Ok(())
    }

    async fn update_key(&self, ip: IpAddr, old_key: &str, new_key: &str) -> Result<(), IpamError> {
        self.check_failure(old_key)?;
        let mut records = self.records.lock().unwrap();
        if !Self::check_held_by(&records, ip, old_key)? {
            return Err(IpamError::NotFound(format!("{} held by {}", ip, old_key)));
        }
        if let Some(record) = records.get_mut(&ip) {
            record.key = new_key.to_string();
            record.update_time = Some(chrono::Utc::now());
        }
        self.writes.lock().unwrap().push(MockWrite::UpdateKey {
            ip,
            old_key: old_key.to_string(),
            new_key: new_key.to_string(),
        });
        Ok(())
    }

    async fn release(&self, key: &str, ip: IpAddr, reason: &str) -> Result<(), IpamError> {
        self.check_failure(key)?;
        let mut records = self.records.lock().unwrap();
        if !Self::check_held_by(&records, ip, key)? {
            return Ok(());
        }
        records.remove(&ip);
        self.writes.lock().unwrap().push(MockWrite::Release {
            key: key.to_string(),
            ip,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

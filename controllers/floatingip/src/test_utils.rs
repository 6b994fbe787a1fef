//! Test utilities for unit testing the reconciler
//!
//! This module provides in-memory listers and a recording cluster writer,
//! plus helpers for creating test pods and owners.

use crate::cluster::{ClusterWriter, Lister, Listers};
use crate::config::{Config, LabelFilter};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{InstanceStatus, LABEL_NETWORK, LABEL_RELEASE_POLICY, LABEL_VALUE_FLOATING_IP, TApp, TAppSpec};
use ipam_client::MockIpam;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lister over a fixed set of objects
pub struct StaticLister<K> {
    kind: &'static str,
    items: Mutex<Vec<Arc<K>>>,
    synced: AtomicBool,
    failing: AtomicBool,
}

impl<K> StaticLister<K> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: Mutex::new(Vec::new()),
            synced: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }

    pub fn add(&self, item: K) {
        self.items.lock().unwrap().push(Arc::new(item));
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl<K> Lister<K> for StaticLister<K>
where
    K: Resource + Send + Sync,
{
    fn list(&self, selector: &LabelFilter) -> Result<Vec<Arc<K>>, ControllerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControllerError::List(self.kind.to_string()));
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| selector.matches(item.meta().labels.as_ref()))
            .cloned()
            .collect())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// A pod annotation patch seen by the [`RecordingWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationPatch {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

/// Cluster writer recording every write; the first writes can be made to fail.
#[derive(Default)]
pub struct RecordingWriter {
    patches: Mutex<Vec<AnnotationPatch>>,
    replaced: Mutex<Vec<TApp>>,
    attempts: AtomicU32,
    failures_left: AtomicU32,
}

impl RecordingWriter {
    /// Fail the next `count` writes
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn patches(&self) -> Vec<AnnotationPatch> {
        self.patches.lock().unwrap().clone()
    }

    pub fn replaced(&self) -> Vec<TApp> {
        self.replaced.lock().unwrap().clone()
    }

    /// Number of write calls, failed ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), ControllerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ControllerError::Watch("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterWriter for RecordingWriter {
    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        self.check_failure()?;
        self.patches.lock().unwrap().push(AnnotationPatch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            annotations: annotations.clone(),
        });
        Ok(())
    }

    async fn replace_tapp(&self, tapp: &TApp) -> Result<(), ControllerError> {
        self.check_failure()?;
        self.replaced.lock().unwrap().push(tapp.clone());
        Ok(())
    }
}

/// In-memory cluster: listers for every kind and a recording writer
pub struct TestCluster {
    pub pods: Arc<StaticLister<Pod>>,
    pub stateful_sets: Arc<StaticLister<StatefulSet>>,
    pub deployments: Arc<StaticLister<Deployment>>,
    pub tapps: Arc<StaticLister<TApp>>,
    pub writer: Arc<RecordingWriter>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            pods: Arc::new(StaticLister::new("pods")),
            stateful_sets: Arc::new(StaticLister::new("statefulsets")),
            deployments: Arc::new(StaticLister::new("deployments")),
            tapps: Arc::new(StaticLister::new("tapps")),
            writer: Arc::new(RecordingWriter::default()),
        }
    }

    pub fn listers(&self) -> Listers {
        Listers {
            pods: self.pods.clone(),
            stateful_sets: self.stateful_sets.clone(),
            deployments: self.deployments.clone(),
            tapps: self.tapps.clone(),
        }
    }

    /// Reconciler over this cluster and `ipam`, with millisecond write retries
    pub fn reconciler(&self, ipam: &MockIpam) -> Reconciler {
        Reconciler::new(Arc::new(ipam.clone()), self.listers(), self.writer.clone(), &test_config())
    }
}

/// Default configuration with write retries short enough for tests
pub fn test_config() -> Config {
    Config {
        annotation_patch_interval: Duration::from_millis(1),
        annotation_patch_timeout: Duration::from_millis(50),
        ..Config::default()
    }
}

fn owner_labels(policy: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NETWORK.to_string(), LABEL_VALUE_FLOATING_IP.to_string());
    if let Some(policy) = policy {
        labels.insert(LABEL_RELEASE_POLICY.to_string(), policy.to_string());
    }
    labels
}

fn meta(namespace: &str, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Helper to create a running floating IP pod scheduled on `node-1`
pub fn create_test_pod(namespace: &str, name: &str, ip: Option<&str>) -> Pod {
    Pod {
        metadata: meta(namespace, name, owner_labels(None)),
        spec: Some(PodSpec {
            node_name: Some("node-1".to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: ip.map(str::to_string),
            ..Default::default()
        }),
    }
}

/// Marks a pod as owned by the given ReplicaSet
pub fn with_replica_set_owner(mut pod: Pod, replica_set: &str) -> Pod {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "ReplicaSet".to_string(),
        name: replica_set.to_string(),
        uid: format!("uid-{}", replica_set),
        ..Default::default()
    }]);
    pod
}

pub fn with_annotation(mut pod: Pod, key: &str, value: &str) -> Pod {
    pod.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    pod
}

pub fn with_pod_label(mut pod: Pod, key: &str, value: &str) -> Pod {
    pod.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    pod
}

pub fn evicted(mut pod: Pod) -> Pod {
    let status = pod.status.get_or_insert_with(Default::default);
    status.phase = Some("Failed".to_string());
    status.reason = Some("Evicted".to_string());
    pod
}

pub fn create_test_stateful_set(namespace: &str, name: &str, replicas: i32, policy: Option<&str>) -> StatefulSet {
    StatefulSet {
        metadata: meta(namespace, name, owner_labels(policy)),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn create_test_deployment(namespace: &str, name: &str, replicas: i32, policy: Option<&str>) -> Deployment {
    Deployment {
        metadata: meta(namespace, name, owner_labels(policy)),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn create_test_tapp(
    namespace: &str,
    name: &str,
    replicas: i32,
    policy: Option<&str>,
    statuses: &[(&str, InstanceStatus)],
) -> TApp {
    let mut tapp = TApp::new(
        name,
        TAppSpec {
            replicas,
            statuses: statuses.iter().map(|(id, status)| (id.to_string(), *status)).collect(),
            ..Default::default()
        },
    );
    tapp.metadata = meta(namespace, name, owner_labels(policy));
    tapp
}

/// Drops the floating IP opt-in label of an owner
pub fn without_network_label<K: Resource>(mut owner: K) -> K {
    if let Some(labels) = owner.meta_mut().labels.as_mut() {
        labels.remove(LABEL_NETWORK);
    }
    owner
}

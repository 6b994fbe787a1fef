//! Cluster access used by the reconciler.
//!
//! Reads go through [`Lister`]s backed by reflector caches, writes through a
//! [`ClusterWriter`]. Both are traits so reconciliation can run against
//! in-memory fakes.

use crate::config::LabelFilter;
use crate::error::ControllerError;
use crds::TApp;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube_runtime::reflector::Store;
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Read access to a cache of objects.
pub trait Lister<K>: Send + Sync {
    /// Objects whose labels match `selector`.
    fn list(&self, selector: &LabelFilter) -> Result<Vec<Arc<K>>, ControllerError>;

    /// Whether the cache finished its initial listing.
    fn has_synced(&self) -> bool;
}

/// Lister over a kube-runtime reflector store.
pub struct ReflectorLister<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
}

impl<K> ReflectorLister<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    pub fn new(store: Store<K>) -> Self {
        Self { store }
    }
}

impl<K> Lister<K> for ReflectorLister<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    fn list(&self, selector: &LabelFilter) -> Result<Vec<Arc<K>>, ControllerError> {
        let mut objects = self.store.state();
        if !selector.is_empty() {
            objects.retain(|obj| selector.matches(Some(obj.labels())));
        }
        Ok(objects)
    }

    fn has_synced(&self) -> bool {
        matches!(self.store.wait_until_ready().now_or_never(), Some(Ok(())))
    }
}

/// The caches one reconciliation pass reads from.
#[derive(Clone)]
pub struct Listers {
    pub pods: Arc<dyn Lister<Pod>>,
    pub stateful_sets: Arc<dyn Lister<StatefulSet>>,
    pub deployments: Arc<dyn Lister<Deployment>>,
    pub tapps: Arc<dyn Lister<TApp>>,
}

impl Listers {
    pub fn has_synced(&self) -> bool {
        let caches = [
            ("pod", self.pods.has_synced()),
            ("statefulset", self.stateful_sets.has_synced()),
            ("deployment", self.deployments.has_synced()),
            ("tapp", self.tapps.has_synced()),
        ];
        for (kind, synced) in caches {
            if !synced {
                debug!("the {} store has not been synced yet", kind);
                return false;
            }
        }
        true
    }
}

/// Writes the reconciler performs against the API server.
#[async_trait::async_trait]
pub trait ClusterWriter: Send + Sync {
    /// Merge-patches annotations onto a pod.
    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError>;

    /// Replaces a TApp with the given object.
    async fn replace_tapp(&self, tapp: &TApp) -> Result<(), ControllerError>;
}

/// [`ClusterWriter`] talking to the API server.
#[derive(Clone)]
pub struct KubeWriter {
    client: Client,
}

impl KubeWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ClusterWriter for KubeWriter {
    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": { "annotations": annotations }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn replace_tapp(&self, tapp: &TApp) -> Result<(), ControllerError> {
        let namespace = tapp.namespace().unwrap_or_default();
        let api: Api<TApp> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&tapp.name_any(), &PostParams::default(), tapp).await?;
        Ok(())
    }
}

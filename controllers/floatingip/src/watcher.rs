//! Reflector caches for the objects the reconciler reads.
//!
//! Every kind gets a kube-runtime watcher feeding a reflector store in a
//! background task. The reconciler only ever reads the stores through
//! [`Lister`](crate::cluster::Lister)s; the periodic resync replaces event
//! driven reconciliation.

use crate::cluster::{Listers, ReflectorLister};
use crate::config::Config;
use crate::error::ControllerError;
use crds::TApp;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, Resource};
use kube_runtime::{WatchStreamExt, reflector, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Spawns a reflector for `api` and returns a lister over its store.
///
/// The task only returns if the watch stream ends, which the default backoff
/// never lets happen on its own.
fn reflect<K>(
    api: Api<K>,
    config: watcher::Config,
    kind: &'static str,
) -> (Arc<ReflectorLister<K>>, JoinHandle<Result<(), ControllerError>>)
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let (store, writer) = reflector::store();
    let handle = tokio::spawn(async move {
        info!("Starting {} reflector", kind);
        watcher(api, config)
            .default_backoff()
            .reflect(writer)
            .for_each(|event| async move {
                if let Err(e) = event {
                    warn!("{} watch error: {}", kind, e);
                }
            })
            .await;
        Err(ControllerError::Watch(format!("{} watch stream ended", kind)))
    });
    (Arc::new(ReflectorLister::new(store)), handle)
}

/// The running reflectors and the listers reading their stores.
pub struct Reflectors {
    pub listers: Listers,
    pub pods: JoinHandle<Result<(), ControllerError>>,
    pub stateful_sets: JoinHandle<Result<(), ControllerError>>,
    pub deployments: JoinHandle<Result<(), ControllerError>>,
    pub tapps: JoinHandle<Result<(), ControllerError>>,
}

impl Reflectors {
    /// Starts one reflector per kind.
    ///
    /// Pods are watched through the pod selector, in the watched namespace
    /// when one is configured. Owners are watched cluster-wide.
    pub fn start(client: Client, config: &Config) -> Self {
        let pod_api: Api<Pod> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let mut pod_watch = watcher::Config::default();
        if !config.pod_selector.is_empty() {
            pod_watch = pod_watch.labels(&config.pod_selector.to_string());
        }

        let (pod_lister, pods) = reflect(pod_api, pod_watch, "pod");
        let (stateful_set_lister, stateful_sets) = reflect(
            Api::<StatefulSet>::all(client.clone()),
            watcher::Config::default(),
            "statefulset",
        );
        let (deployment_lister, deployments) = reflect(
            Api::<Deployment>::all(client.clone()),
            watcher::Config::default(),
            "deployment",
        );
        let (tapp_lister, tapps) = reflect(Api::<TApp>::all(client), watcher::Config::default(), "tapp");

        Self {
            listers: Listers {
                pods: pod_lister,
                stateful_sets: stateful_set_lister,
                deployments: deployment_lister,
                tapps: tapp_lister,
            },
            pods,
            stateful_sets,
            deployments,
            tapps,
        }
    }
}

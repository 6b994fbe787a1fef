//! TApp floating IP resource requests.
//!
//! The scheduler only places TApp pods on nodes with floating IPs left when
//! each container requests one `fip.microscaler.io/floatingip`. TApps that
//! opted into floating IPs without the request get it added.

use super::{PassStats, Reconciler};
use crate::error::ControllerError;
use crate::keys::app_full_name;
use crds::{RESOURCE_FLOATING_IP, TApp};
use kube::ResourceExt;
use serde_json::{Map, Value};
use tracing::{info, warn};

const FLOATING_IP_QUANTITY: &str = "1";

impl Reconciler {
    /// Adds the floating IP request to every selected TApp missing it.
    pub(crate) async fn sync_tapp_resources(&self, stats: &mut PassStats) -> Result<(), ControllerError> {
        info!("sync TApp request resource");
        let tapps = self.listers.tapps.list(&self.pod_selector)?;
        for tapp in tapps {
            if requests_floating_ip(&tapp) {
                continue;
            }
            let full_name = app_full_name(&tapp.namespace().unwrap_or_default(), &tapp.name_any());
            let updated = with_floating_ip_requests(&tapp);
            let writer = self.writer.as_ref();
            let (updated, name) = (&updated, full_name.as_str());
            let result = self
                .write_backoff
                .poll(|| async move {
                    let result = writer.replace_tapp(updated).await;
                    if let Err(e) = &result {
                        warn!("failed to update tapp resource {}: {}", name, e);
                    }
                    result
                })
                .await;
            match result {
                Ok(()) => {
                    info!("requested {} for tapp {}", RESOURCE_FLOATING_IP, full_name);
                    stats.tapps_updated += 1;
                }
                Err(timeout) => {
                    warn!(
                        "giving up updating tapp resource {} after {} attempts: {}",
                        full_name, timeout.attempts, timeout.last_error
                    );
                    stats.failures += 1;
                }
            }
        }
        Ok(())
    }
}

/// Whether every container of every template requests a floating IP.
pub fn requests_floating_ip(tapp: &TApp) -> bool {
    templates(tapp).all(|template| containers(template).all(container_requests_floating_ip))
}

/// Copy of `tapp` with the floating IP request set on every container.
pub fn with_floating_ip_requests(tapp: &TApp) -> TApp {
    let mut updated = tapp.clone();
    request_floating_ip_in(&mut updated.spec.template);
    for template in updated.spec.template_pool.values_mut() {
        request_floating_ip_in(template);
    }
    updated
}

fn templates(tapp: &TApp) -> impl Iterator<Item = &Value> {
    std::iter::once(&tapp.spec.template).chain(tapp.spec.template_pool.values())
}

fn containers(template: &Value) -> impl Iterator<Item = &Value> {
    template
        .pointer("/spec/containers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn container_requests_floating_ip(container: &Value) -> bool {
    container
        .pointer("/resources/requests")
        .and_then(|requests| requests.get(RESOURCE_FLOATING_IP))
        .is_some()
}

fn request_floating_ip_in(template: &mut Value) {
    let Some(containers) = template.pointer_mut("/spec/containers").and_then(Value::as_array_mut) else {
        return;
    };
    for container in containers {
        let requests = container
            .as_object_mut()
            .and_then(|c| object_entry(c, "resources"))
            .and_then(|r| object_entry(r, "requests"));
        if let Some(requests) = requests {
            requests.insert(
                RESOURCE_FLOATING_IP.to_string(),
                Value::String(FLOATING_IP_QUANTITY.to_string()),
            );
        }
    }
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    let entry = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

//! Startup sweep: queue an arrival for every interface already present

use tracing::{debug, info};

use super::queue::EventSender;
use crate::data::{DeviceAction, DeviceEvent, Guid};
use crate::hw::{PropertyKey, PropertyStore};

/// Enqueue an Arrival for every live interface of `classes`
///
/// Returns how many events were queued. Classes that cannot be listed are
/// skipped.
pub fn sweep_present<S: PropertyStore + ?Sized>(store: &S, classes: &[Guid], sender: &EventSender) -> usize {
    let mut queued = 0;
    for class in classes {
        let nodes = match store.interfaces(class) {
            Ok(nodes) => nodes,
            Err(e) => {
                debug!(class = %class, "Skipping class in startup sweep: {}", e);
                continue;
            }
        };
        for node in nodes {
            let Some(path) = store
                .property(node, PropertyKey::InterfacePath)
                .and_then(|v| v.into_string())
            else {
                continue;
            };
            sender.enqueue(DeviceEvent::new(DeviceAction::Arrival, path, *class));
            queued += 1;
        }
    }
    info!(queued, "Startup sweep queued present devices");
    queued
}

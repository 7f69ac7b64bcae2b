//! Device-tree enforcement
//!
//! Decisions apply to a whole physical device. Before acting, the enforcer
//! climbs from the interface's node to the container root: the topmost node
//! that still carries the same container id.
//!
//! Enforcement is best-effort. Failures are logged here and never returned
//! to the worker.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::constants::limits;
use crate::data::{DevNode, DeviceIdentity, Guid};
use crate::hw::{Platform, PropertyKey};

/// Climb to the topmost ancestor of `node` that belongs to `container`
pub fn find_container_root<P: Platform + ?Sized>(platform: &P, node: DevNode, container: &Guid) -> DevNode {
    if container.is_nil() {
        return node;
    }

    let mut root = node;
    for _ in 0..limits::MAX_TREE_DEPTH {
        let Some(parent) = platform.parent(root) else {
            break;
        };
        let parent_container = platform
            .property(parent, PropertyKey::ContainerId)
            .and_then(|v| v.as_guid());
        if parent_container.as_ref() != Some(container) {
            break;
        }
        root = parent;
    }
    root
}

/// Applies Block (and manual re-enable) to container roots
pub struct Enforcer {
    platform: Arc<dyn Platform>,
    persist: bool,
}

impl Enforcer {
    /// `persist` is handed to every disable request
    pub fn new(platform: Arc<dyn Platform>, persist: bool) -> Self {
        Self { platform, persist }
    }

    pub fn container_root(&self, node: DevNode, container: &Guid) -> DevNode {
        find_container_root(self.platform.as_ref(), node, container)
    }

    /// Disable the container root of a resolved identity
    ///
    /// Returns whether the device was disabled.
    pub fn block(&self, identity: &DeviceIdentity) -> bool {
        let Some(node) = identity.dev_node else {
            warn!(path = %identity.device_path, "Cannot block: no device node for interface");
            return false;
        };
        let root = self.container_root(node, &identity.container_id);
        self.disable(root)
    }

    /// Request a disable; refusals and failures are logged only
    pub fn disable(&self, node: DevNode) -> bool {
        let name = self.platform.node_name(node);
        match self.platform.disable(node, self.persist) {
            Ok(()) => {
                info!(node = %name, persist = self.persist, "Device disabled");
                true
            }
            Err(e) if e.is_refusal() => {
                warn!(node = %name, "Device refused disable: {}", e);
                false
            }
            Err(e) => {
                error!(node = %name, "Disable failed: {}", e);
                false
            }
        }
    }

    /// Re-enable a node and re-enumerate it so child interfaces come back
    pub fn enable(&self, node: DevNode) -> bool {
        let name = self.platform.node_name(node);
        if let Err(e) = self.platform.enable(node) {
            error!(node = %name, "Enable failed: {}", e);
            return false;
        }
        if let Err(e) = self.platform.reenumerate(node) {
            warn!(node = %name, "Re-enumeration failed: {}", e);
        } else {
            debug!(node = %name, "Re-enumeration requested");
        }
        info!(node = %name, "Device enabled");
        true
    }

    /// Re-enable the whole physical device that `node` belongs to
    pub fn enable_container(&self, node: DevNode) -> bool {
        let container = self
            .platform
            .property(node, PropertyKey::ContainerId)
            .and_then(|v| v.as_guid())
            .unwrap_or(Guid::NIL);
        let root = self.container_root(node, &container);
        self.enable(root)
    }
}

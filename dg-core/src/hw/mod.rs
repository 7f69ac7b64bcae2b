//! Platform interaction modules
//!
//! The pipeline talks to the operating system through three seams:
//!
//! - [`PropertyStore`]: enumerate interface instances and read their properties
//! - [`DeviceTree`]: walk parents and enable/disable nodes
//! - [`NotificationSource`]: deliver device-change events into the event queue
//!
//! `sysfs` and `uevent` implement them for Linux.

mod sysfs;
mod uevent;

pub use sysfs::{interest_class, SysfsHost};
pub use uevent::UeventMonitor;

use crate::data::{DevNode, Guid};
use crate::error::Result;
use crate::pipeline::EventSender;

/// Keys understood by [`PropertyStore::property`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Canonical interface path, comparable with event device paths
    InterfacePath,
    ContainerId,
    FriendlyName,
    Manufacturer,
    Class,
    DeviceDescription,
}

/// A typed property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Guid(Guid),
}

impl PropertyValue {
    pub fn into_string(self) -> Option<String> {
        match self {
            PropertyValue::String(s) => Some(s),
            PropertyValue::Guid(_) => None,
        }
    }

    pub fn as_guid(&self) -> Option<Guid> {
        match self {
            PropertyValue::Guid(g) => Some(*g),
            PropertyValue::String(_) => None,
        }
    }
}

/// Keyed property lookup by device instance
pub trait PropertyStore: Send + Sync {
    /// All live interface instances of one interface class
    fn interfaces(&self, class: &Guid) -> Result<Vec<DevNode>>;

    /// Absent properties are `None`, never an error
    fn property(&self, node: DevNode, key: PropertyKey) -> Option<PropertyValue>;
}

/// Device-tree navigation and control
pub trait DeviceTree: Send + Sync {
    fn parent(&self, node: DevNode) -> Option<DevNode>;

    /// `persist` asks for the disable to survive a reboot
    fn disable(&self, node: DevNode, persist: bool) -> Result<()>;

    fn enable(&self, node: DevNode) -> Result<()>;

    /// Ask the OS to re-enumerate the node so its children reappear
    fn reenumerate(&self, node: DevNode) -> Result<()>;

    /// Human-readable name of a node for logs
    fn node_name(&self, node: DevNode) -> String {
        node.to_string()
    }
}

/// Everything the pipeline needs from the host
pub trait Platform: PropertyStore + DeviceTree {}

impl<T: PropertyStore + DeviceTree> Platform for T {}

/// Producer of device-change events
///
/// Implementations run their own delivery context and must only call
/// [`EventSender::enqueue`] from it.
pub trait NotificationSource {
    /// Start delivering events for `classes` into `sink`
    fn start(&mut self, classes: &[Guid], sink: EventSender) -> Result<()>;

    /// Stop delivering; idempotent
    fn stop(&mut self);
}

//! Device identity resolution
//!
//! Turns a raw device path plus its interface class into a [`DeviceIdentity`].
//!
//! # How It Works
//!
//! 1. **Path tokens**: vendor id, product id and serial number are parsed out of
//!    the path text itself (`VID_xxxx`, `PID_xxxx`, and the alphanumeric run
//!    after the second `#`).
//! 2. **Instance lookup**: every live interface of the class is enumerated and
//!    the one whose canonical path equals the input (ignoring case) is selected.
//! 3. **Properties**: friendly name, manufacturer, class name and container id
//!    are read from the selected instance.
//! 4. **Category**: the class name is matched against the category table.
//!
//! Resolution is total. Anything that cannot be found stays empty (or nil for
//! the container id) and the event still goes through the pipeline.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::constants::{category, limits};
use crate::data::{Category, DevNode, DeviceIdentity, Guid};
use crate::hw::{PropertyKey, PropertyStore};

fn vid_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)VID_([0-9A-F]{4})").ok()).as_ref()
}

fn pid_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)PID_([0-9A-F]{4})").ok()).as_ref()
}

fn serial_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^[^#]*#[^#]*#([0-9A-Za-z]{{{},}})[{{#]", limits::MIN_SERIAL_LEN)).ok()
    })
    .as_ref()
}

fn capture(pattern: Option<&Regex>, input: &str) -> Option<String> {
    pattern?
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Vendor id from the first `VID_xxxx` token, lower-cased
pub fn extract_vid(path: &str) -> String {
    capture(vid_pattern(), path)
        .map(|v| v.to_lowercase())
        .unwrap_or_default()
}

/// Product id from the first `PID_xxxx` token, lower-cased
pub fn extract_pid(path: &str) -> String {
    capture(pid_pattern(), path)
        .map(|p| p.to_lowercase())
        .unwrap_or_default()
}

/// Serial number: the alphanumeric run (8+ chars) right after the second `#`,
/// terminated by `{` or `#`. Case is preserved.
pub fn extract_serial(path: &str) -> String {
    capture(serial_pattern(), path).unwrap_or_default()
}

/// Classify a device class name; first table match wins
pub fn classify(class_name: &str) -> Category {
    category::TABLE
        .iter()
        .find(|(needle, _)| class_name.contains(needle))
        .map(|(_, cat)| cat.clone())
        .unwrap_or_else(|| {
            if class_name.is_empty() {
                Category::Unknown
            } else {
                Category::Other(class_name.to_string())
            }
        })
}

fn eq_folded(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn string_property<S: PropertyStore + ?Sized>(store: &S, node: DevNode, key: PropertyKey) -> String {
    store
        .property(node, key)
        .and_then(|v| v.into_string())
        .unwrap_or_default()
}

/// Find the live interface instance of `class` whose canonical path is `device_path`
fn find_instance<S: PropertyStore + ?Sized>(store: &S, device_path: &str, class: &Guid) -> Option<DevNode> {
    // The enumeration is an owned list; it is released on every return path.
    let instances = match store.interfaces(class) {
        Ok(instances) => instances,
        Err(e) => {
            debug!(class = %class, "Interface enumeration failed: {}", e);
            return None;
        }
    };

    instances.into_iter().find(|&node| {
        store
            .property(node, PropertyKey::InterfacePath)
            .and_then(|v| v.into_string())
            .map(|canonical| eq_folded(&canonical, device_path))
            .unwrap_or(false)
    })
}

/// Build the identity snapshot for one device interface
pub fn resolve<S: PropertyStore + ?Sized>(store: &S, device_path: &str, interface_class: Guid) -> DeviceIdentity {
    let mut identity = DeviceIdentity {
        device_path: device_path.to_string(),
        vid: extract_vid(device_path),
        pid: extract_pid(device_path),
        serial: extract_serial(device_path),
        interface_class,
        ..Default::default()
    };

    if let Some(node) = find_instance(store, device_path, &interface_class) {
        identity.dev_node = Some(node);
        identity.friendly_name = string_property(store, node, PropertyKey::FriendlyName);
        identity.manufacturer = string_property(store, node, PropertyKey::Manufacturer);
        identity.class_name = string_property(store, node, PropertyKey::Class);
        identity.container_id = store
            .property(node, PropertyKey::ContainerId)
            .and_then(|v| v.as_guid())
            .unwrap_or(Guid::NIL);

        if identity.friendly_name.is_empty() {
            identity.friendly_name = string_property(store, node, PropertyKey::DeviceDescription);
        }
    } else {
        trace!(path = device_path, "No live interface instance matches path");
    }

    identity.category = classify(&identity.class_name);
    identity
}

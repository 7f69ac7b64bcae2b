//! sysfs platform backend
//!
//! Implements [`PropertyStore`] and [`DeviceTree`] on top of `/sys`.
//!
//! # Mapping
//!
//! - A device node is a directory below `sys/devices`. Directories are interned
//!   into [`DevNode`] tokens on first sight and keep their token until the
//!   device is removed ([`SysfsHost::forget_devpath`]) or found missing
//!   ([`SysfsHost::forget_missing`]).
//! - Interest classes map to sysfs like this:
//!   - USB device: `bus/usb/devices` entries with `idVendor`, root hubs excluded
//!   - disk / volume: `class/block` entries without / with a `partition` file
//!   - HID: `class/hidraw`
//!   - serial port: `class/tty`
//!
//!   Block, hidraw and tty nodes only count when a USB device sits above them.
//! - The canonical interface path is `BUS#VID_vvvv&PID_pppp#SERIAL#/devices/...`,
//!   so the textual vid/pid/serial extraction works on it unchanged. SERIAL is
//!   the USB serial with everything but ASCII alphanumerics dropped, and empty
//!   when the device reports none.
//! - The container id is derived from the owning USB device: the first 16 bytes
//!   of SHA-256 over its devpath and serial number.
//! - Disable and enable write the USB `authorized` attribute. Nodes without one
//!   cannot be disabled.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::{DeviceTree, PropertyKey, PropertyStore, PropertyValue};
use crate::constants::{class_name, interface, paths, sysfs};
use crate::data::{serial_token, DevNode, Guid};
use crate::error::{DevgateError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKind {
    UsbDevice,
    Disk,
    Partition,
    Hidraw,
    Tty,
    Other(String),
}

impl NodeKind {
    fn bus_token(&self) -> String {
        match self {
            NodeKind::UsbDevice => "USB".to_string(),
            NodeKind::Disk => "USBSTOR".to_string(),
            NodeKind::Partition => "STORAGE".to_string(),
            NodeKind::Hidraw => "HID".to_string(),
            NodeKind::Tty => "USBSER".to_string(),
            NodeKind::Other(subsystem) => subsystem.to_uppercase(),
        }
    }

    fn class_name(&self) -> &str {
        match self {
            NodeKind::UsbDevice => class_name::USB,
            NodeKind::Disk => class_name::DISK,
            NodeKind::Partition => class_name::VOLUME,
            NodeKind::Hidraw => class_name::HID,
            NodeKind::Tty => class_name::PORTS,
            NodeKind::Other(subsystem) => subsystem,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            NodeKind::UsbDevice => "USB device",
            NodeKind::Disk => "Disk drive",
            NodeKind::Partition => "Storage volume",
            NodeKind::Hidraw => "HID device",
            NodeKind::Tty => "Serial port",
            NodeKind::Other(_) => "Device",
        }
    }
}

/// Interned device directories
///
/// Tokens are never reused, so a token whose directory was forgotten simply
/// stops resolving.
#[derive(Debug, Default)]
struct NodeTable {
    by_path: HashMap<PathBuf, DevNode>,
    by_node: HashMap<DevNode, PathBuf>,
    last: u64,
}

impl NodeTable {
    fn intern(&mut self, path: PathBuf) -> DevNode {
        if let Some(&node) = self.by_path.get(&path) {
            return node;
        }
        self.last += 1;
        let node = DevNode::from_raw(self.last);
        self.by_node.insert(node, path.clone());
        self.by_path.insert(path, node);
        node
    }

    /// Keep only directories for which `keep` holds; returns how many were dropped
    fn retain(&mut self, mut keep: impl FnMut(&Path) -> bool) -> usize {
        let before = self.by_path.len();
        self.by_path.retain(|path, _| keep(path));
        let by_path = &self.by_path;
        self.by_node.retain(|_, path| by_path.contains_key(path));
        before - self.by_path.len()
    }
}

/// Linux device host backed by sysfs
#[derive(Debug)]
pub struct SysfsHost {
    root: PathBuf,
    sys: PathBuf,
    devices: PathBuf,
    nodes: Mutex<NodeTable>,
}

impl Default for SysfsHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsHost {
    /// Host reading the live `/sys`
    pub fn new() -> Self {
        Self::with_root_path(PathBuf::from(paths::SYSFS_ROOT))
    }

    /// Host reading `<root>/sys`
    pub fn with_root_path(root: PathBuf) -> Self {
        let root = fs::canonicalize(&root).unwrap_or(root);
        let sys = root.join("sys");
        let devices = root.join(paths::sysfs::DEVICES);
        Self {
            root,
            sys,
            devices,
            nodes: Mutex::new(NodeTable::default()),
        }
    }

    fn intern(&self, path: PathBuf) -> DevNode {
        self.nodes.lock().intern(path)
    }

    fn path_of(&self, node: DevNode) -> Option<PathBuf> {
        self.nodes.lock().by_node.get(&node).cloned()
    }

    /// Drop the tokens of a removed device and of everything below it
    pub fn forget_devpath(&self, devpath: &str) -> usize {
        let dir = self.devpath_dir(devpath);
        self.nodes.lock().retain(|path| !path.starts_with(&dir))
    }

    /// Drop the tokens of every directory that no longer exists
    pub fn forget_missing(&self) -> usize {
        self.nodes.lock().retain(Path::is_dir)
    }

    /// Whether the device directory for a kernel devpath exists
    pub fn is_present(&self, devpath: &str) -> bool {
        self.devpath_dir(devpath).is_dir()
    }

    #[cfg(test)]
    pub(crate) fn interned(&self) -> usize {
        self.nodes.lock().by_path.len()
    }

    fn devpath_dir(&self, devpath: &str) -> PathBuf {
        self.sys.join(devpath.trim_start_matches('/'))
    }

    /// Kernel devpath (`/devices/...`) of a sysfs directory
    fn devpath(&self, path: &Path) -> String {
        match path.strip_prefix(&self.sys) {
            Ok(relative) => format!("/{}", relative.display()),
            Err(_) => path.display().to_string(),
        }
    }

    /// Node for a kernel devpath, if the device directory exists
    pub fn node_for_devpath(&self, devpath: &str) -> Option<DevNode> {
        let dir = self.devpath_dir(devpath);
        dir.is_dir().then(|| self.intern(dir))
    }

    /// Node for a sysfs path or kernel devpath given by a user
    pub fn node_for_path(&self, path: &Path) -> Result<DevNode> {
        let candidate = if path.starts_with("/devices") {
            self.devpath_dir(&path.to_string_lossy())
        } else {
            path.to_path_buf()
        };
        let resolved = fs::canonicalize(&candidate)
            .map_err(|_| DevgateError::DeviceNotFound(path.display().to_string()))?;
        if !resolved.starts_with(&self.devices) || !resolved.is_dir() {
            return Err(DevgateError::DeviceNotFound(path.display().to_string()));
        }
        Ok(self.intern(resolved))
    }

    /// Canonical interface path for a present device
    pub fn interface_path_for_devpath(&self, devpath: &str) -> Option<String> {
        let dir = self.devpath_dir(devpath);
        dir.is_dir().then(|| self.interface_path(&dir))
    }

    fn kind(&self, path: &Path) -> NodeKind {
        let subsystem = fs::read_link(path.join(sysfs::SUBSYSTEM))
            .ok()
            .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        match subsystem.as_str() {
            sysfs::SUBSYSTEM_USB if is_usb_device(path) => NodeKind::UsbDevice,
            sysfs::SUBSYSTEM_BLOCK if path.join(sysfs::PARTITION).is_file() => NodeKind::Partition,
            sysfs::SUBSYSTEM_BLOCK => NodeKind::Disk,
            sysfs::SUBSYSTEM_HIDRAW => NodeKind::Hidraw,
            sysfs::SUBSYSTEM_TTY => NodeKind::Tty,
            _ => NodeKind::Other(subsystem),
        }
    }

    /// Nearest USB device at or above `path`
    fn usb_device(&self, path: &Path) -> Option<PathBuf> {
        path.ancestors()
            .take_while(|p| p.starts_with(&self.devices) && *p != self.devices)
            .find(|p| is_usb_device(p))
            .map(Path::to_path_buf)
    }

    fn interface_path(&self, path: &Path) -> String {
        let usb = self.usb_device(path);
        let ids = usb
            .as_deref()
            .map(|dev| {
                format!(
                    "VID_{}&PID_{}",
                    read_attr(dev, sysfs::ID_VENDOR).unwrap_or_default().to_uppercase(),
                    read_attr(dev, sysfs::ID_PRODUCT).unwrap_or_default().to_uppercase()
                )
            })
            .unwrap_or_default();
        let instance = usb
            .as_deref()
            .and_then(|dev| read_attr(dev, sysfs::SERIAL))
            .map(|serial| serial_token(&serial))
            .unwrap_or_default();

        format!("{}#{}#{}#{}", self.kind(path).bus_token(), ids, instance, self.devpath(path))
    }

    fn container_id(&self, path: &Path) -> Option<Guid> {
        let usb = self.usb_device(path)?;
        let serial = read_attr(&usb, sysfs::SERIAL).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(self.devpath(&usb).as_bytes());
        hasher.update([0u8]);
        hasher.update(serial.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Some(Guid::from_bytes(bytes))
    }

    fn friendly_name(&self, path: &Path) -> Option<String> {
        read_attr(path, sysfs::PRODUCT)
            .or_else(|| read_attr(path, sysfs::DEVICE_MODEL))
            .or_else(|| self.usb_device(path).and_then(|dev| read_attr(&dev, sysfs::PRODUCT)))
    }

    fn manufacturer(&self, path: &Path) -> Option<String> {
        read_attr(path, sysfs::MANUFACTURER)
            .or_else(|| read_attr(path, sysfs::DEVICE_VENDOR))
            .or_else(|| self.usb_device(path).and_then(|dev| read_attr(&dev, sysfs::MANUFACTURER)))
    }

    fn class_listing(&self, class: &Guid) -> Option<(&'static str, NodeKind)> {
        let listing = match *class {
            interface::USB_DEVICE => (paths::sysfs::USB_DEVICES, NodeKind::UsbDevice),
            interface::DISK => (paths::sysfs::BLOCK_CLASS, NodeKind::Disk),
            interface::VOLUME => (paths::sysfs::BLOCK_CLASS, NodeKind::Partition),
            interface::HID => (paths::sysfs::HIDRAW_CLASS, NodeKind::Hidraw),
            interface::COMPORT => (paths::sysfs::TTY_CLASS, NodeKind::Tty),
            _ => return None,
        };
        Some(listing)
    }

    fn write_attr(&self, node: DevNode, attr: &str, value: &str) -> Result<()> {
        let path = self
            .path_of(node)
            .ok_or_else(|| DevgateError::DeviceNotFound(node.to_string()))?;
        let target = path.join(attr);
        if !target.is_file() {
            return Err(DevgateError::NotDisableable(format!(
                "{} has no {} attribute",
                self.devpath(&path),
                attr
            )));
        }

        trace!(path = %target.display(), value, "Writing sysfs attribute");
        fs::write(&target, value).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => DevgateError::PermissionDenied(target.display().to_string()),
            _ => DevgateError::enforcement(self.devpath(&path), e.to_string()),
        })
    }
}

impl PropertyStore for SysfsHost {
    fn interfaces(&self, class: &Guid) -> Result<Vec<DevNode>> {
        let (listing, wanted) = self
            .class_listing(class)
            .ok_or_else(|| DevgateError::NotSupported(format!("interface class {}", class)))?;
        let dir = self.root.join(listing);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(DevgateError::FileRead { path: dir, source }),
        };

        let mut found: Vec<PathBuf> = entries
            .flatten()
            .filter_map(|entry| fs::canonicalize(entry.path()).ok())
            .filter(|path| path.starts_with(&self.devices))
            .filter(|path| self.kind(path) == wanted)
            .filter(|path| wanted == NodeKind::UsbDevice || self.usb_device(path).is_some())
            .collect();
        found.sort();
        found.dedup();

        Ok(found.into_iter().map(|path| self.intern(path)).collect())
    }

    fn property(&self, node: DevNode, key: PropertyKey) -> Option<PropertyValue> {
        let path = self.path_of(node)?;
        match key {
            PropertyKey::InterfacePath => Some(PropertyValue::String(self.interface_path(&path))),
            PropertyKey::ContainerId => self.container_id(&path).map(PropertyValue::Guid),
            PropertyKey::FriendlyName => self.friendly_name(&path).map(PropertyValue::String),
            PropertyKey::Manufacturer => self.manufacturer(&path).map(PropertyValue::String),
            PropertyKey::Class => {
                let kind = self.kind(&path);
                let name = kind.class_name();
                (!name.is_empty()).then(|| PropertyValue::String(name.to_string()))
            }
            PropertyKey::DeviceDescription => {
                let kind = self.kind(&path);
                Some(PropertyValue::String(format!("{} {}", kind.description(), dir_name(&path))))
            }
        }
    }
}

impl DeviceTree for SysfsHost {
    fn parent(&self, node: DevNode) -> Option<DevNode> {
        let path = self.path_of(node)?;
        let parent = path.parent()?;
        if !parent.starts_with(&self.devices) || parent == self.devices {
            return None;
        }
        Some(self.intern(parent.to_path_buf()))
    }

    fn disable(&self, node: DevNode, persist: bool) -> Result<()> {
        if persist {
            debug!(node = %self.node_name(node), "sysfs authorization does not survive reboot");
        }
        self.write_attr(node, sysfs::AUTHORIZED, sysfs::DEAUTHORIZE)
    }

    fn enable(&self, node: DevNode) -> Result<()> {
        self.write_attr(node, sysfs::AUTHORIZED, sysfs::AUTHORIZE)
    }

    fn reenumerate(&self, node: DevNode) -> Result<()> {
        self.write_attr(node, sysfs::UEVENT, sysfs::REPLAY_ADD)
    }

    fn node_name(&self, node: DevNode) -> String {
        self.path_of(node)
            .map(|path| self.devpath(&path))
            .unwrap_or_else(|| node.to_string())
    }
}

/// Interest class of a kernel uevent, if it is one the agent watches
pub fn interest_class(subsystem: &str, devtype: Option<&str>, devpath: &str) -> Option<Guid> {
    let name = devpath.rsplit('/').next().unwrap_or_default();
    match (subsystem, devtype) {
        (sysfs::SUBSYSTEM_USB, Some(sysfs::DEVTYPE_USB_DEVICE)) if !is_root_hub(name) => Some(interface::USB_DEVICE),
        _ if !is_usb_backed(devpath) => None,
        (sysfs::SUBSYSTEM_BLOCK, Some(sysfs::DEVTYPE_DISK)) => Some(interface::DISK),
        (sysfs::SUBSYSTEM_BLOCK, Some(sysfs::DEVTYPE_PARTITION)) => Some(interface::VOLUME),
        (sysfs::SUBSYSTEM_HIDRAW, _) => Some(interface::HID),
        (sysfs::SUBSYSTEM_TTY, _) => Some(interface::COMPORT),
        _ => None,
    }
}

/// A devpath below a USB root hub (`.../usbN/...`)
fn is_usb_backed(devpath: &str) -> bool {
    devpath.split('/').any(|segment| {
        segment
            .strip_prefix(sysfs::ROOT_HUB_PREFIX)
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    })
}

fn is_root_hub(name: &str) -> bool {
    name.starts_with(sysfs::ROOT_HUB_PREFIX)
}

fn is_usb_device(path: &Path) -> bool {
    path.join(sysfs::ID_VENDOR).is_file()
        && path.join(sysfs::ID_PRODUCT).is_file()
        && !is_root_hub(&dir_name(path))
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read a sysfs attribute, trimmed; empty or missing is `None`
fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

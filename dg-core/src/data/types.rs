//! Core data types for Devgate
//!
//! Defines the event, identity and decision types that flow through the
//! enforcement pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DevgateError;

/// Opaque 128-bit identifier (interface class or container id)
///
/// Compared and hashed by value. Displayed in registry form,
/// e.g. `{A5DCBF10-6530-11D2-901F-00C04FB951ED}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid(u128);

impl Guid {
    /// The all-zero identifier, used when a container id is unavailable
    pub const NIL: Guid = Guid(0);

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Build from 16 big-endian bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:04X}-{:012X}}}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Guid {
    type Err = DevgateError;

    /// Accepts `8-4-4-4-12` hex groups, with or without surrounding braces
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(trimmed);

        let groups: Vec<&str> = inner.split('-').collect();
        let expected_lens = [8, 4, 4, 4, 12];
        if groups.len() != expected_lens.len()
            || groups
                .iter()
                .zip(expected_lens.iter())
                .any(|(g, &len)| g.len() != len || !g.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(DevgateError::InvalidGuid(s.to_string()));
        }

        u128::from_str_radix(&groups.concat(), 16)
            .map(Guid)
            .map_err(|_| DevgateError::InvalidGuid(s.to_string()))
    }
}

/// Non-owning reference to a node in the OS device tree
///
/// The OS owns the node; this is a copyable token that the platform backend
/// knows how to resolve. No lifetime management happens on this side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DevNode(u64);

impl DevNode {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DevNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "devnode#{}", self.0)
    }
}

/// What happened to a device interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Arrival,
    Removal,
    NodeChange,
    Unknown,
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceAction::Arrival => "arrival",
            DeviceAction::Removal => "removal",
            DeviceAction::NodeChange => "node-change",
            DeviceAction::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A single device-change notification
///
/// Created in the notification context, consumed exactly once by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    pub device_path: String,
    pub interface_class: Guid,
}

impl DeviceEvent {
    pub fn new(action: DeviceAction, device_path: impl Into<String>, interface_class: Guid) -> Self {
        Self {
            action,
            device_path: device_path.into(),
            interface_class,
        }
    }
}

/// Device category derived from the class name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Category {
    Usb,
    Disk,
    Volume,
    Hid,
    Network,
    Serial,
    MtpPtp,
    /// Class name that matched none of the known categories
    Other(String),
    #[default]
    Unknown,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Usb => f.write_str("USB"),
            Category::Disk => f.write_str("Disk"),
            Category::Volume => f.write_str("Volume"),
            Category::Hid => f.write_str("HID"),
            Category::Network => f.write_str("Network"),
            Category::Serial => f.write_str("Serial"),
            Category::MtpPtp => f.write_str("MTP/PTP"),
            Category::Other(name) => f.write_str(name),
            Category::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Snapshot of everything known about one device interface
///
/// Rebuilt for every event and never cached. Empty strings mean unknown.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    pub device_path: String,
    pub vid: String,
    pub pid: String,
    pub serial: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub class_name: String,
    pub interface_class: Guid,
    /// Groups every interface of one physical device; nil when unresolved
    pub container_id: Guid,
    pub category: Category,
    /// Device-tree node of the matched interface instance, when found
    pub dev_node: Option<DevNode>,
}

impl DeviceIdentity {
    /// Short human-readable description for logs
    pub fn describe(&self) -> String {
        let name = if self.friendly_name.is_empty() {
            "(unnamed)"
        } else {
            self.friendly_name.as_str()
        };
        format!(
            "{} [{}] vid={} pid={} serial={}",
            name,
            self.category,
            or_dash(&self.vid),
            or_dash(&self.pid),
            or_dash(&self.serial)
        )
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

/// Policy decision for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Block,
    Audit,
}

impl PolicyAction {
    /// Parse a policy document action: "allow" and "block" (any case),
    /// everything else audits
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "allow" => PolicyAction::Allow,
            "block" => PolicyAction::Block,
            _ => PolicyAction::Audit,
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyAction::Allow => "allow",
            PolicyAction::Block => "block",
            PolicyAction::Audit => "audit",
        };
        f.write_str(name)
    }
}

/// Serial as it appears in an interface path: ASCII alphanumerics only
///
/// Device paths can only carry alphanumeric serials, so policy serials are
/// folded the same way and a rule written with the kernel-reported serial
/// (dashes, dots and all) still matches.
pub fn serial_token(serial: &str) -> String {
    serial.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// One whitelist/blacklist rule; an empty field matches anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyEntry {
    pub vid: String,
    pub pid: String,
    pub serial: String,
}

impl PolicyEntry {
    /// Build a rule, case folding every field and reducing the serial to its
    /// [`serial_token`]
    pub fn new(vid: &str, pid: &str, serial: &str) -> Self {
        Self {
            vid: vid.trim().to_lowercase(),
            pid: pid.trim().to_lowercase(),
            serial: serial_token(serial).to_lowercase(),
        }
    }

    /// Rule with only a vendor id
    pub fn vendor(vid: &str) -> Self {
        Self::new(vid, "", "")
    }

    /// Rule with only a serial number
    pub fn serial(serial: &str) -> Self {
        Self::new("", "", serial)
    }

    /// True when the rule constrains nothing
    pub fn is_wildcard(&self) -> bool {
        self.vid.is_empty() && self.pid.is_empty() && self.serial.is_empty()
    }

    /// Match against already case-folded identity fields
    pub fn matches(&self, vid: &str, pid: &str, serial: &str) -> bool {
        field_matches(&self.vid, vid) && field_matches(&self.pid, pid) && field_matches(&self.serial, serial)
    }
}

fn field_matches(rule: &str, value: &str) -> bool {
    rule.is_empty() || rule == value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_display_and_parse() {
        let guid = Guid::from_u128(0xA5DCBF10_6530_11D2_901F_00C04FB951ED);
        assert_eq!(guid.to_string(), "{A5DCBF10-6530-11D2-901F-00C04FB951ED}");
        assert_eq!("{a5dcbf10-6530-11d2-901f-00c04fb951ed}".parse::<Guid>().unwrap(), guid);
        assert_eq!("A5DCBF10-6530-11D2-901F-00C04FB951ED".parse::<Guid>().unwrap(), guid);
    }

    #[test]
    fn test_guid_rejects_malformed() {
        assert!("A5DCBF10-6530-11D2-901F".parse::<Guid>().is_err());
        assert!("{Z5DCBF10-6530-11D2-901F-00C04FB951ED}".parse::<Guid>().is_err());
        assert!("".parse::<Guid>().is_err());
    }

    #[test]
    fn test_policy_action_parse() {
        assert_eq!(PolicyAction::parse("Allow"), PolicyAction::Allow);
        assert_eq!(PolicyAction::parse("BLOCK"), PolicyAction::Block);
        assert_eq!(PolicyAction::parse("log-only"), PolicyAction::Audit);
        assert_eq!(PolicyAction::parse(""), PolicyAction::Audit);
    }

    #[test]
    fn test_entry_wildcards() {
        let rule = PolicyEntry::vendor("0781");
        assert!(rule.matches("0781", "5567", "abc12345"));
        assert!(rule.matches("0781", "", ""));
        assert!(!rule.matches("046d", "5567", "abc12345"));
        assert!(PolicyEntry::default().is_wildcard());
    }

    #[test]
    fn test_entry_serial_keeps_only_alphanumerics() {
        assert_eq!(serial_token("AA-1234.5678 90_x"), "AA1234567890x");
        let rule = PolicyEntry::serial("AA-1234567890");
        assert_eq!(rule.serial, "aa1234567890");
        assert!(rule.matches("0781", "5567", "aa1234567890"));
    }

    #[test]
    fn test_entry_is_case_folded() {
        let rule = PolicyEntry::new("1A2B", "3C4D", "ABC12345");
        assert_eq!(rule.vid, "1a2b");
        assert!(rule.matches("1a2b", "3c4d", "abc12345"));
    }
}

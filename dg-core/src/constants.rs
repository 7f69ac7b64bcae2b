//! Constants and configuration values for Devgate
//!
//! Centralizes all magic numbers, paths, identifiers and configuration defaults.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Agent configuration directory
    pub const CONFIG_DIR: &str = "/etc/devgate";

    /// Agent configuration file
    pub const AGENT_CONFIG_FILE: &str = "/etc/devgate/agent.json";

    /// Default policy document
    pub const POLICY_FILE: &str = "/etc/devgate/policy.json";

    /// Default event log directory
    pub const LOG_DIR: &str = "/var/log/devgate";

    /// Event log directory used when the configured one cannot be created
    pub const FALLBACK_LOG_DIR: &str = "/tmp/devgate";

    /// Daily event log file name: `events_YYYYMMDD.json`
    pub const EVENT_LOG_PREFIX: &str = "events_";
    pub const EVENT_LOG_SUFFIX: &str = ".json";

    /// Root under which `sys/` is found on a live system
    pub const SYSFS_ROOT: &str = "/";

    /// systemd journal socket, used to decide on journald logging
    pub const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

    /// sysfs locations relative to the sysfs root
    pub mod sysfs {
        /// All device directories live below this
        pub const DEVICES: &str = "sys/devices";
        /// USB bus device links
        pub const USB_DEVICES: &str = "sys/bus/usb/devices";
        /// Block devices (disks and partitions)
        pub const BLOCK_CLASS: &str = "sys/class/block";
        /// Raw HID nodes
        pub const HIDRAW_CLASS: &str = "sys/class/hidraw";
        /// Terminal devices (serial ports among them)
        pub const TTY_CLASS: &str = "sys/class/tty";
    }
}

/// sysfs attribute and subsystem names
pub mod sysfs {
    pub const AUTHORIZED: &str = "authorized";
    pub const UEVENT: &str = "uevent";
    pub const SUBSYSTEM: &str = "subsystem";
    pub const PARTITION: &str = "partition";
    pub const ID_VENDOR: &str = "idVendor";
    pub const ID_PRODUCT: &str = "idProduct";
    pub const SERIAL: &str = "serial";
    pub const PRODUCT: &str = "product";
    pub const MANUFACTURER: &str = "manufacturer";
    /// SCSI model/vendor, reached through a block device's `device` link
    pub const DEVICE_MODEL: &str = "device/model";
    pub const DEVICE_VENDOR: &str = "device/vendor";

    /// Value written to `authorized` to disable a device
    pub const DEAUTHORIZE: &str = "0";
    pub const AUTHORIZE: &str = "1";
    /// Value written to `uevent` to replay the add event
    pub const REPLAY_ADD: &str = "add";

    pub const SUBSYSTEM_USB: &str = "usb";
    pub const SUBSYSTEM_BLOCK: &str = "block";
    pub const SUBSYSTEM_HIDRAW: &str = "hidraw";
    pub const SUBSYSTEM_TTY: &str = "tty";
    pub const DEVTYPE_USB_DEVICE: &str = "usb_device";
    pub const DEVTYPE_DISK: &str = "disk";
    pub const DEVTYPE_PARTITION: &str = "partition";

    /// Root hubs are named `usbN`
    pub const ROOT_HUB_PREFIX: &str = "usb";
}

/// Environment variables
pub mod env {
    /// Agent config file override
    pub const CONFIG: &str = "DEVGATE_CONFIG";
    /// Log filter (trace, debug, info, warn, error)
    pub const LOG: &str = "DEVGATE_LOG";
}

/// Device interface classes the agent registers for
pub mod interface {
    use crate::data::Guid;

    /// Generic USB function (GUID_DEVINTERFACE_USB_DEVICE)
    pub const USB_DEVICE: Guid = Guid::from_u128(0xA5DCBF10_6530_11D2_901F_00C04FB951ED);

    /// Disk drive (GUID_DEVINTERFACE_DISK)
    pub const DISK: Guid = Guid::from_u128(0x53F56307_B6BF_11D0_94F2_00A0C91EFB8B);

    /// Storage volume (GUID_DEVINTERFACE_VOLUME)
    pub const VOLUME: Guid = Guid::from_u128(0x53F5630D_B6BF_11D0_94F2_00A0C91EFB8B);

    /// Human interface device (GUID_DEVINTERFACE_HID)
    pub const HID: Guid = Guid::from_u128(0x4D1E55B2_F16F_11CF_88CB_001111000030);

    /// Serial port (GUID_DEVINTERFACE_COMPORT)
    pub const COMPORT: Guid = Guid::from_u128(0x86E0D1E0_8089_11D0_9CE4_08003E301F73);

    /// The five interest classes, in registration order
    pub const INTEREST_CLASSES: [Guid; 5] = [USB_DEVICE, DISK, VOLUME, HID, COMPORT];
}

/// Device class names reported by the property store
pub mod class_name {
    pub const USB: &str = "USB";
    pub const DISK: &str = "DiskDrive";
    pub const VOLUME: &str = "Volume";
    pub const HID: &str = "HIDClass";
    pub const PORTS: &str = "Ports";
}

/// Category classification table
///
/// Order matters: the first substring found in the class name wins.
pub mod category {
    use crate::data::Category;

    pub const TABLE: [(&str, Category); 7] = [
        ("USB", Category::Usb),
        ("Disk", Category::Disk),
        ("Volume", Category::Volume),
        ("HID", Category::Hid),
        ("Net", Category::Network),
        ("COM", Category::Serial),
        ("WPD", Category::MtpPtp),
    ];
}

/// Audit event identifiers
pub mod events {
    pub const AGENT_STARTED: u32 = 1000;
    pub const AGENT_STOPPED: u32 = 1001;
    pub const DEVICE_CONNECTED: u32 = 2000;
    pub const DEVICE_DISCONNECTED: u32 = 2001;
    pub const DEVICE_BLOCKED: u32 = 3000;
    pub const DEVICE_ALLOWED: u32 = 3001;
    pub const DEVICE_AUDITED: u32 = 3002;
    pub const POLICY_LOADED: u32 = 4000;
    pub const ERROR: u32 = 9000;
}

/// Agent configuration defaults
pub mod defaults {
    pub const LOG_LEVEL: &str = "info";
    pub const POLICY_RELOAD_SECS: u64 = 5;
}

/// Timing values
pub mod timing {
    use super::Duration;

    /// How often the netlink reader wakes to check for shutdown
    pub const UEVENT_POLL_INTERVAL_MS: u16 = 500;

    /// Main thread idle tick while waiting for shutdown
    pub const SUPERVISOR_TICK: Duration = Duration::from_millis(250);
}

/// Size limits
pub mod limits {
    /// Maximum policy document size (1MB)
    pub const MAX_POLICY_SIZE: u64 = 1024 * 1024;

    /// Maximum agent config file size
    pub const MAX_CONFIG_SIZE: u64 = 64 * 1024;

    /// Maximum rules per list in a policy document
    pub const MAX_RULES: usize = 4096;

    /// Netlink receive buffer
    pub const UEVENT_BUF_SIZE: usize = 1024 * 1024;

    /// Minimum length of a serial number token in a device path
    pub const MIN_SERIAL_LEN: usize = 8;

    /// Maximum policy reload interval in seconds
    pub const MAX_RELOAD_SECS: u64 = 3600;

    /// Maximum parent hops when looking for a container root
    pub const MAX_TREE_DEPTH: usize = 64;
}

//! Devgate Core Library
//!
//! Device control for Linux hosts: watch peripheral attach/detach events,
//! resolve each one to a physical device, decide allow/block against a policy,
//! and enforce the decision on the device tree.
//!
//! # Features
//!
//! - **Event Pipeline**: Non-blocking event queue feeding a single worker thread
//! - **Identity Resolution**: Vendor/product/serial, friendly metadata and container id
//! - **Policy Engine**: Whitelist/blacklist with sticky, reference-counted per-device decisions
//! - **Enforcement**: Disable/enable applied at the container root of a composite device
//! - **Linux Backend**: sysfs property store and netlink uevent monitor
//!
//! # Module Structure
//!
//! - `data/` - Data types, policy document, validation
//! - `engine/` - Policy engine and decision state
//! - `pipeline/` - Event queue, worker loop, startup sweep
//! - `hw/` - Platform seams and the sysfs/uevent backend
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dg_core::{EventQueue, PolicyEngine, SysfsHost, TracingAudit, Worker};
//!
//! let engine = Arc::new(PolicyEngine::new());
//! engine.load_file("/etc/devgate/policy.json".as_ref()).unwrap();
//!
//! let queue = EventQueue::new();
//! let worker = Worker::new(queue.clone(), Arc::new(SysfsHost::new()), engine, Arc::new(TracingAudit), false);
//! let handle = worker.spawn().unwrap();
//! handle.stop_and_join();
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;
pub mod pipeline;

// Standalone modules
pub mod audit;
pub mod constants;
pub mod enforcement;
pub mod error;
pub mod identity;

// Re-export primary types from data/
pub use data::{
    Category, DevNode, DeviceAction, DeviceEvent, DeviceIdentity, Guid, PolicyAction,
    PolicyDocument, PolicyEntry, PolicyRules,
};

// Re-export error types
pub use error::{DevgateError, Result};

// Re-export engine types
pub use engine::{PolicyEngine, PolicySnapshot, RuleSummary};

// Re-export pipeline types
pub use pipeline::{sweep_present, Drained, EventQueue, EventSender, StopHandle, Worker, WorkerHandle};

// Re-export platform seams and the Linux backend
pub use hw::{
    interest_class, DeviceTree, NotificationSource, Platform, PropertyKey, PropertyStore,
    PropertyValue, SysfsHost, UeventMonitor,
};

pub use audit::{AuditLevel, AuditSink, TracingAudit};
pub use enforcement::{find_container_root, Enforcer};
pub use identity::resolve;

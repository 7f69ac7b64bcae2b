//! Audit sink
//!
//! The pipeline reports decisions and lifecycle events through an injected
//! [`AuditSink`]. It never knows where records end up.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditLevel::Info => "info",
            AuditLevel::Warn => "warn",
            AuditLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Leveled event sink; see `constants::events` for ids
pub trait AuditSink: Send + Sync {
    fn record(&self, level: AuditLevel, event_id: u32, message: &str);

    fn info(&self, event_id: u32, message: &str) {
        self.record(AuditLevel::Info, event_id, message);
    }

    fn warn(&self, event_id: u32, message: &str) {
        self.record(AuditLevel::Warn, event_id, message);
    }

    fn error(&self, event_id: u32, message: &str) {
        self.record(AuditLevel::Error, event_id, message);
    }
}

/// Sink that only forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, level: AuditLevel, event_id: u32, message: &str) {
        forward_to_tracing(level, event_id, message);
    }
}

/// Emit an audit record as a tracing event
pub fn forward_to_tracing(level: AuditLevel, event_id: u32, message: &str) {
    match level {
        AuditLevel::Info => info!(event_id, "{}", message),
        AuditLevel::Warn => warn!(event_id, "{}", message),
        AuditLevel::Error => error!(event_id, "{}", message),
    }
}

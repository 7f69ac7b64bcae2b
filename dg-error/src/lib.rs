//! Unified error handling for Devgate
//!
//! This crate provides a single error type used across all Devgate components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using DevgateError
pub type Result<T> = std::result::Result<T, DevgateError>;

/// Unified error type for all Devgate operations
#[derive(thiserror::Error, Debug)]
pub enum DevgateError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Configuration and Policy Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid identifier: {0}")]
    InvalidGuid(String),

    // ============================================================================
    // Device and Platform Errors
    // ============================================================================
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device cannot be disabled: {0}")]
    NotDisableable(String),

    #[error("Enforcement on {node} failed: {reason}")]
    Enforcement {
        node: String,
        reason: String,
    },

    #[error("Netlink error: {0}")]
    Netlink(String),

    // ============================================================================
    // Pipeline Errors
    // ============================================================================
    #[error("Startup failed: {0}")]
    Startup(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl DevgateError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a policy error from a string
    pub fn policy(msg: impl Into<String>) -> Self {
        Self::InvalidPolicy(msg.into())
    }

    /// Create an enforcement error for a device node
    pub fn enforcement(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Enforcement {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Create a startup error from a string
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Whether this error means the OS refused to act on the device
    /// (system-critical node or missing privilege), as opposed to a fault.
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::NotDisableable(_) | Self::PermissionDenied(_))
    }
}

// Allow converting from String to DevgateError
impl From<String> for DevgateError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to DevgateError
impl From<&str> for DevgateError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_classification() {
        assert!(DevgateError::NotDisableable("usb1".into()).is_refusal());
        assert!(DevgateError::PermissionDenied("authorized".into()).is_refusal());
        assert!(!DevgateError::generic("boom").is_refusal());
        assert!(!DevgateError::Netlink("bind".into()).is_refusal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = DevgateError::enforcement("/devices/usb1/1-2", "write failed");
        assert_eq!(err.to_string(), "Enforcement on /devices/usb1/1-2 failed: write failed");
    }
}

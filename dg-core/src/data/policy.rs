//! Policy document format
//!
//! The on-disk policy is a JSON document:
//!
//! ```json
//! {
//!   "actions": { "default": "block", "blacklist": "block" },
//!   "whitelist": [ { "vid": "046d" }, { "serial": "ABC12345" } ],
//!   "blacklist": [ { "vid": "0781", "pid": "5567" } ]
//! }
//! ```
//!
//! Every section is optional. Action strings other than "allow" and "block"
//! mean audit.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::limits;
use crate::data::types::{PolicyAction, PolicyEntry};
use crate::data::validation::{read_bounded, validate_hex_id};
use crate::error::{DevgateError, Result};

/// Top-level policy document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub actions: ActionsSection,
    #[serde(default)]
    pub whitelist: Vec<RuleDocument>,
    #[serde(default)]
    pub blacklist: Vec<RuleDocument>,
}

/// `actions` section; absent keys leave the current engine value alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<String>,
}

/// A single rule as written in the document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

impl RuleDocument {
    fn to_entry(&self) -> PolicyEntry {
        PolicyEntry::new(
            self.vid.as_deref().unwrap_or(""),
            self.pid.as_deref().unwrap_or(""),
            self.serial.as_deref().unwrap_or(""),
        )
    }
}

/// Fully built rule set, ready to be published to the engine
#[derive(Debug, Clone)]
pub struct PolicyRules {
    pub whitelist: Vec<PolicyEntry>,
    pub blacklist: Vec<PolicyEntry>,
    pub default_action: Option<PolicyAction>,
    pub blacklist_action: Option<PolicyAction>,
}

impl PolicyDocument {
    /// Parse a document from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_bounded(path, limits::MAX_POLICY_SIZE)?;
        Self::from_json(&text)
    }

    /// Validate and case-fold into engine rules
    pub fn into_rules(self) -> Result<PolicyRules> {
        Ok(PolicyRules {
            whitelist: build_list("whitelist", &self.whitelist)?,
            blacklist: build_list("blacklist", &self.blacklist)?,
            default_action: self.actions.default.as_deref().map(PolicyAction::parse),
            blacklist_action: self.actions.blacklist.as_deref().map(PolicyAction::parse),
        })
    }
}

fn build_list(name: &str, rules: &[RuleDocument]) -> Result<Vec<PolicyEntry>> {
    if rules.len() > limits::MAX_RULES {
        return Err(DevgateError::policy(format!(
            "{} has {} rules (max {})",
            name,
            rules.len(),
            limits::MAX_RULES
        )));
    }

    rules
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            let entry = rule.to_entry();
            validate_hex_id("vid", &entry.vid)
                .and_then(|_| validate_hex_id("pid", &entry.pid))
                .and_then(|_| validate_serial(rule.serial.as_deref(), &entry.serial))
                .map_err(|e| DevgateError::policy(format!("{} rule #{}: {}", name, i + 1, e)))?;
            Ok(entry)
        })
        .collect()
}

/// A serial written as only punctuation would fold into a wildcard
fn validate_serial(written: Option<&str>, folded: &str) -> Result<()> {
    match written {
        Some(raw) if folded.is_empty() && !raw.trim().is_empty() => Err(DevgateError::policy(format!(
            "serial '{}' has no letters or digits",
            raw
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_document() {
        let doc = PolicyDocument::from_json(
            r#"{
                "actions": { "default": "Allow", "blacklist": "audit" },
                "whitelist": [ { "serial": "ABC12345" } ],
                "blacklist": [ { "vid": "0781", "pid": "5567" }, { "vid": "1A2B" } ]
            }"#,
        )
        .unwrap();
        let rules = doc.into_rules().unwrap();
        assert_eq!(rules.default_action, Some(PolicyAction::Allow));
        assert_eq!(rules.blacklist_action, Some(PolicyAction::Audit));
        assert_eq!(rules.whitelist, vec![PolicyEntry::serial("abc12345")]);
        assert_eq!(rules.blacklist.len(), 2);
        assert_eq!(rules.blacklist[1].vid, "1a2b");
    }

    #[test]
    fn test_empty_document_keeps_actions_unset() {
        let rules = PolicyDocument::from_json("{}").unwrap().into_rules().unwrap();
        assert!(rules.default_action.is_none());
        assert!(rules.blacklist_action.is_none());
        assert!(rules.whitelist.is_empty() && rules.blacklist.is_empty());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            PolicyDocument::from_json("{ \"whitelist\": [ { \"vid\": 12 } ]"),
            Err(DevgateError::JsonParse(_))
        ));
    }

    #[test]
    fn test_serial_punctuation_is_folded() {
        let doc = PolicyDocument::from_json(r#"{ "whitelist": [ { "serial": "AA-1234.567890" } ] }"#).unwrap();
        let rules = doc.into_rules().unwrap();
        assert_eq!(rules.whitelist[0].serial, "aa1234567890");
    }

    #[test]
    fn test_punctuation_only_serial_is_rejected() {
        let doc = PolicyDocument::from_json(r#"{ "whitelist": [ { "vid": "046d" }, { "serial": "--" } ] }"#).unwrap();
        let err = doc.into_rules().unwrap_err();
        assert!(err.to_string().contains("whitelist rule #2"));
    }

    #[test]
    fn test_bad_vendor_id_is_rejected() {
        let doc = PolicyDocument::from_json(r#"{ "blacklist": [ { "vid": "0x781" } ] }"#).unwrap();
        let err = doc.into_rules().unwrap_err();
        assert!(err.to_string().contains("blacklist rule #1"));
    }
}

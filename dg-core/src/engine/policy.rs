//! Policy engine
//!
//! Holds the whitelist/blacklist rules and the per-container decision state,
//! and turns a [`DeviceIdentity`] into an Allow/Block/Audit decision.
//!
//! # How It Works
//!
//! 1. **Sticky fast path**: a container already recorded as allowed or blocked
//!    gets the same decision again without touching the rule lists, so every
//!    interface of one physical device shares the fate of the first one.
//! 2. **Blacklist**: scanned first, in order. A hit applies the blacklist action
//!    and records the container as blocked.
//! 3. **Whitelist**: a hit records the container as allowed.
//! 4. **Default**: returned as-is. Nothing is recorded, so the next interface of
//!    the same container is evaluated from scratch.
//!
//! Rule sets are built completely before they are published with a single
//! pointer swap under the write lock. Evaluators clone the published set and
//! scan it outside the lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::state::PolicyState;
use crate::data::{DeviceIdentity, Guid, PolicyAction, PolicyDocument, PolicyEntry, PolicyRules};
use crate::error::Result;

/// Immutable, published rule set
#[derive(Debug)]
struct RuleSet {
    whitelist: Vec<PolicyEntry>,
    blacklist: Vec<PolicyEntry>,
    default_action: PolicyAction,
    blacklist_action: PolicyAction,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            default_action: PolicyAction::Block,
            blacklist_action: PolicyAction::Block,
        }
    }
}

#[derive(Debug, Default)]
struct EngineInner {
    rules: Arc<RuleSet>,
    state: PolicyState,
}

/// Summary of a published rule set, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSummary {
    pub whitelist: usize,
    pub blacklist: usize,
    pub default_action: PolicyAction,
    pub blacklist_action: PolicyAction,
}

/// Point-in-time copy of the decision state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub allowed: Vec<Guid>,
    pub blocked: Vec<Guid>,
    pub ref_counts: HashMap<Guid, u32>,
    pub mapped_paths: usize,
}

impl PolicySnapshot {
    /// True when the container appears nowhere in the state
    pub fn is_forgotten(&self, container: &Guid) -> bool {
        !self.allowed.contains(container)
            && !self.blocked.contains(container)
            && !self.ref_counts.contains_key(container)
    }
}

/// Stateful allow/block policy evaluator
///
/// Shared between the worker and the reload loop as `Arc<PolicyEngine>`.
/// Starts with empty lists and Block/Block actions.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    inner: RwLock<EngineInner>,
    rule_scans: AtomicU64,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new rule set; decision state is kept
    pub fn load(
        &self,
        whitelist: Vec<PolicyEntry>,
        blacklist: Vec<PolicyEntry>,
        default_action: PolicyAction,
        blacklist_action: PolicyAction,
    ) -> RuleSummary {
        let rules = Arc::new(RuleSet {
            whitelist,
            blacklist,
            default_action,
            blacklist_action,
        });
        let summary = summarize(&rules);
        self.inner.write().rules = rules;
        summary
    }

    /// Publish rules from a parsed document; absent actions keep their current value
    pub fn load_rules(&self, rules: PolicyRules) -> RuleSummary {
        let PolicyRules {
            whitelist,
            blacklist,
            default_action,
            blacklist_action,
        } = rules;

        let mut inner = self.inner.write();
        let published = Arc::new(RuleSet {
            whitelist,
            blacklist,
            default_action: default_action.unwrap_or(inner.rules.default_action),
            blacklist_action: blacklist_action.unwrap_or(inner.rules.blacklist_action),
        });
        let summary = summarize(&published);
        inner.rules = published;
        summary
    }

    /// Read, parse and publish a policy document
    ///
    /// On any error the current rules stay in place.
    pub fn load_file(&self, path: &Path) -> Result<RuleSummary> {
        let rules = PolicyDocument::load(path)?.into_rules()?;
        let summary = self.load_rules(rules);
        info!(
            path = %path.display(),
            whitelist = summary.whitelist,
            blacklist = summary.blacklist,
            "Policy loaded (default={}, blacklist={})",
            summary.default_action,
            summary.blacklist_action
        );
        Ok(summary)
    }

    /// Decide what to do with one device interface
    pub fn evaluate(&self, identity: &DeviceIdentity) -> PolicyAction {
        let container = identity.container_id;

        let rules = {
            let inner = self.inner.read();
            if let Some(allowed) = inner.state.decision(&container) {
                let mapped = inner.state.is_mapped(&identity.device_path, &container);
                drop(inner);
                if !mapped {
                    self.on_arrival(identity, allowed);
                }
                debug!(container = %container, allowed, "Sticky decision");
                return if allowed {
                    PolicyAction::Allow
                } else {
                    PolicyAction::Block
                };
            }
            Arc::clone(&inner.rules)
        };

        self.rule_scans.fetch_add(1, Ordering::Relaxed);

        let vid = identity.vid.to_lowercase();
        let pid = identity.pid.to_lowercase();
        let serial = identity.serial.to_lowercase();

        if rules.blacklist.iter().any(|rule| rule.matches(&vid, &pid, &serial)) {
            self.on_arrival(identity, false);
            return rules.blacklist_action;
        }

        if rules.whitelist.iter().any(|rule| rule.matches(&vid, &pid, &serial)) {
            self.on_arrival(identity, true);
            return PolicyAction::Allow;
        }

        rules.default_action
    }

    /// Record that `identity` arrived with the given decision
    pub fn on_arrival(&self, identity: &DeviceIdentity, allowed: bool) {
        if identity.container_id.is_nil() {
            debug!(path = %identity.device_path, "No container id; decision not recorded");
            return;
        }
        self.inner
            .write()
            .state
            .record_arrival(&identity.device_path, identity.container_id, allowed);
    }

    /// Forget a device path; unknown paths are ignored
    ///
    /// Returns the container the path was mapped to.
    pub fn on_removal(&self, device_path: &str) -> Option<Guid> {
        self.inner.write().state.record_removal(device_path)
    }

    /// Number of times the rule lists were scanned
    pub fn rule_scan_count(&self) -> u64 {
        self.rule_scans.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        let inner = self.inner.read();
        let mut allowed: Vec<Guid> = inner.state.allowed().copied().collect();
        let mut blocked: Vec<Guid> = inner.state.blocked().copied().collect();
        allowed.sort();
        blocked.sort();
        PolicySnapshot {
            allowed,
            blocked,
            ref_counts: inner.state.ref_counts().clone(),
            mapped_paths: inner.state.mapped_paths(),
        }
    }

    pub fn summary(&self) -> RuleSummary {
        summarize(&self.inner.read().rules)
    }
}

fn summarize(rules: &RuleSet) -> RuleSummary {
    RuleSummary {
        whitelist: rules.whitelist.len(),
        blacklist: rules.blacklist.len(),
        default_action: rules.default_action,
        blacklist_action: rules.blacklist_action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn identity(path: &str, container: u128, vid: &str, pid: &str, serial: &str) -> DeviceIdentity {
        DeviceIdentity {
            device_path: path.to_string(),
            vid: vid.to_string(),
            pid: pid.to_string(),
            serial: serial.to_string(),
            container_id: Guid::from_u128(container),
            ..Default::default()
        }
    }

    #[test]
    fn test_sticky_decision_skips_rule_scan() {
        let engine = PolicyEngine::new();
        engine.load(vec![], vec![PolicyEntry::vendor("0781")], PolicyAction::Allow, PolicyAction::Block);

        let storage = identity("usb#a", 7, "0781", "5567", "");
        assert_eq!(engine.evaluate(&storage), PolicyAction::Block);
        assert_eq!(engine.rule_scan_count(), 1);

        // Second function of the same device, no vid in its path
        let hid = identity("hid#b", 7, "", "", "");
        assert_eq!(engine.evaluate(&hid), PolicyAction::Block);
        assert_eq!(engine.rule_scan_count(), 1);
        assert_eq!(engine.snapshot().ref_counts.get(&Guid::from_u128(7)), Some(&2));
    }

    #[test]
    fn test_blacklist_wins_over_whitelist() {
        let engine = PolicyEngine::new();
        engine.load(
            vec![PolicyEntry::vendor("0781")],
            vec![PolicyEntry::new("0781", "5567", "")],
            PolicyAction::Allow,
            PolicyAction::Block,
        );
        assert_eq!(engine.evaluate(&identity("p", 1, "0781", "5567", "")), PolicyAction::Block);
    }

    #[test]
    fn test_audited_blacklist_hit_records_block() {
        let engine = PolicyEngine::new();
        engine.load(vec![], vec![PolicyEntry::vendor("0781")], PolicyAction::Allow, PolicyAction::Audit);

        assert_eq!(engine.evaluate(&identity("usb#a", 9, "0781", "", "")), PolicyAction::Audit);
        assert_eq!(engine.snapshot().blocked, vec![Guid::from_u128(9)]);
        assert_eq!(engine.evaluate(&identity("hid#b", 9, "", "", "")), PolicyAction::Block);
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let engine = PolicyEngine::new();
        engine.load(vec![PolicyEntry::serial("ABC12345")], vec![], PolicyAction::Block, PolicyAction::Block);
        assert_eq!(engine.evaluate(&identity("p", 1, "", "", "abc12345")), PolicyAction::Allow);
        assert_eq!(engine.evaluate(&identity("q", 2, "", "", "AbC12345")), PolicyAction::Allow);
    }

    #[test]
    fn test_default_action_is_not_sticky() {
        let engine = PolicyEngine::new();
        engine.load(vec![], vec![], PolicyAction::Audit, PolicyAction::Block);

        assert_eq!(engine.evaluate(&identity("a", 3, "1234", "", "")), PolicyAction::Audit);
        assert_eq!(engine.evaluate(&identity("b", 3, "1234", "", "")), PolicyAction::Audit);
        assert_eq!(engine.rule_scan_count(), 2);
        assert!(engine.snapshot().is_forgotten(&Guid::from_u128(3)));
    }

    #[test]
    fn test_refcount_purges_after_last_removal() {
        let engine = PolicyEngine::new();
        let paths = ["a", "b", "c", "d"];
        for path in paths {
            engine.on_arrival(&identity(path, 9, "", "", ""), true);
        }
        assert_eq!(engine.snapshot().ref_counts.get(&Guid::from_u128(9)), Some(&4));

        for path in paths {
            assert_eq!(engine.on_removal(path), Some(Guid::from_u128(9)));
        }
        let snapshot = engine.snapshot();
        assert!(snapshot.is_forgotten(&Guid::from_u128(9)));
        assert_eq!(snapshot.mapped_paths, 0);
    }

    #[test]
    fn test_unknown_removal_is_noop() {
        let engine = PolicyEngine::new();
        engine.on_arrival(&identity("a", 1, "", "", ""), false);
        let before = engine.snapshot();
        assert_eq!(engine.on_removal("never-seen"), None);
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_nil_container_is_never_sticky() {
        let engine = PolicyEngine::new();
        engine.load(vec![], vec![PolicyEntry::vendor("0781")], PolicyAction::Allow, PolicyAction::Block);

        assert_eq!(engine.evaluate(&identity("a", 0, "0781", "", "")), PolicyAction::Block);
        assert_eq!(engine.evaluate(&identity("b", 0, "046d", "", "")), PolicyAction::Allow);
        assert_eq!(engine.snapshot(), PolicySnapshot::default());
    }

    #[test]
    fn test_load_keeps_decision_state() {
        let engine = PolicyEngine::new();
        engine.load(vec![], vec![PolicyEntry::vendor("0781")], PolicyAction::Allow, PolicyAction::Block);
        assert_eq!(engine.evaluate(&identity("a", 5, "0781", "", "")), PolicyAction::Block);

        engine.load(vec![PolicyEntry::vendor("0781")], vec![], PolicyAction::Allow, PolicyAction::Block);
        assert_eq!(engine.evaluate(&identity("b", 5, "0781", "", "")), PolicyAction::Block);
    }

    #[test]
    fn test_load_rules_keeps_unset_actions() {
        let engine = PolicyEngine::new();
        engine.load(vec![], vec![], PolicyAction::Allow, PolicyAction::Audit);

        let rules = PolicyDocument::from_json(r#"{ "whitelist": [ { "vid": "046d" } ] }"#)
            .unwrap()
            .into_rules()
            .unwrap();
        let summary = engine.load_rules(rules);
        assert_eq!(summary.default_action, PolicyAction::Allow);
        assert_eq!(summary.blacklist_action, PolicyAction::Audit);
        assert_eq!(summary.whitelist, 1);
    }

    #[test]
    fn test_load_file_failure_keeps_rules() {
        let engine = PolicyEngine::new();
        engine.load(vec![], vec![PolicyEntry::vendor("0781")], PolicyAction::Allow, PolicyAction::Block);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"blacklist\": [ ").unwrap();
        assert!(engine.load_file(file.path()).is_err());
        assert!(engine.load_file(Path::new("/nonexistent/policy.json")).is_err());

        let summary = engine.summary();
        assert_eq!(summary.blacklist, 1);
        assert_eq!(summary.default_action, PolicyAction::Allow);
    }

    #[test]
    fn test_load_file_publishes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "actions": {{ "default": "allow" }}, "blacklist": [ {{ "vid": "0781" }} ] }}"#
        )
        .unwrap();

        let engine = PolicyEngine::new();
        let summary = engine.load_file(file.path()).unwrap();
        assert_eq!(summary.default_action, PolicyAction::Allow);
        assert_eq!(summary.blacklist_action, PolicyAction::Block);
        assert_eq!(engine.evaluate(&identity("a", 1, "0781", "", "")), PolicyAction::Block);
    }
}

/*
 * This file is part of Devgate.
 *
 * Copyright (C) 2025 Devgate contributors
 *
 * Devgate is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Devgate is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Devgate. If not, see <https://www.gnu.org/licenses/>.
 */

//! Agent lifecycle: start the pipeline, supervise it, tear it down

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use dg_core::constants::{events, interface, timing};
use dg_core::{
    sweep_present, AuditSink, Enforcer, EventQueue, NotificationSource, Platform, PolicyEngine,
    Result, RuleSummary, SysfsHost, UeventMonitor, Worker,
};

use crate::config::AgentConfig;

/// Run the agent on the live system until `shutdown` is set
pub fn run_agent(config: &AgentConfig, audit: Arc<dyn AuditSink>, shutdown: Arc<AtomicBool>) -> Result<()> {
    let host = Arc::new(SysfsHost::with_root_path(config.sysfs_root.clone()));
    let mut monitor = UeventMonitor::new(Arc::clone(&host));
    run_pipeline(config, host, &mut monitor, audit, shutdown)
}

/// Start-up, supervision and shutdown around any notification source
pub fn run_pipeline<N: NotificationSource>(
    config: &AgentConfig,
    host: Arc<SysfsHost>,
    source: &mut N,
    audit: Arc<dyn AuditSink>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let engine = Arc::new(PolicyEngine::new());
    let summary = match engine.load_file(&config.policy_path) {
        Ok(summary) => summary,
        Err(e) => {
            audit.error(events::ERROR, &format!("Failed to load policy {}: {}", config.policy_path.display(), e));
            return Err(e);
        }
    };
    audit.info(events::POLICY_LOADED, &policy_message(&config.policy_path, &summary));

    let queue = EventQueue::new();
    let worker = Worker::new(
        queue.clone(),
        Arc::clone(&host) as Arc<dyn Platform>,
        Arc::clone(&engine),
        Arc::clone(&audit),
        config.persist_disable,
    );
    let handle = worker.spawn()?;

    if let Err(e) = source.start(&interface::INTEREST_CLASSES, queue.sender()) {
        audit.error(events::ERROR, &format!("Failed to register for device notifications: {}", e));
        handle.stop_and_join();
        return Err(e);
    }

    if config.enforce_present_devices {
        let queued = sweep_present(host.as_ref(), &interface::INTEREST_CLASSES, &queue.sender());
        info!(queued, "Queued already-present devices for evaluation");
    }

    audit.info(events::AGENT_STARTED, "Agent started");

    let mut reloader = config
        .reload_interval()
        .map(|interval| PolicyReloader::new(config.policy_path.clone(), interval));
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(timing::SUPERVISOR_TICK);
        if let Some(reloader) = reloader.as_mut() {
            reloader.poll(&engine, audit.as_ref());
        }
    }

    info!("Shutdown requested");
    source.stop();
    handle.stop_and_join();
    audit.info(events::AGENT_STOPPED, "Agent stopped");
    Ok(())
}

fn policy_message(path: &Path, summary: &RuleSummary) -> String {
    format!(
        "Policy loaded from {}: {} whitelist, {} blacklist, default={}, blacklist action={}",
        path.display(),
        summary.whitelist,
        summary.blacklist,
        summary.default_action,
        summary.blacklist_action
    )
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Polls the policy file and reloads the engine when it changes
///
/// A document that fails to load leaves the previous rules in force.
pub struct PolicyReloader {
    path: PathBuf,
    interval: Duration,
    last_check: Instant,
    last_modified: Option<SystemTime>,
}

impl PolicyReloader {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        let last_modified = modified(&path);
        Self {
            path,
            interval,
            last_check: Instant::now(),
            last_modified,
        }
    }

    /// Check the file if the interval has elapsed; returns whether rules were replaced
    pub fn poll(&mut self, engine: &PolicyEngine, audit: &dyn AuditSink) -> bool {
        if self.last_check.elapsed() < self.interval {
            return false;
        }
        self.check_now(engine, audit)
    }

    pub fn check_now(&mut self, engine: &PolicyEngine, audit: &dyn AuditSink) -> bool {
        self.last_check = Instant::now();

        let Some(current) = modified(&self.path) else {
            debug!(path = %self.path.display(), "Policy file not readable, keeping current rules");
            return false;
        };
        if self.last_modified == Some(current) {
            return false;
        }
        self.last_modified = Some(current);

        match engine.load_file(&self.path) {
            Ok(summary) => {
                audit.info(events::POLICY_LOADED, &policy_message(&self.path, &summary));
                true
            }
            Err(e) => {
                audit.error(
                    events::ERROR,
                    &format!("Policy reload from {} failed, keeping previous rules: {}", self.path.display(), e),
                );
                false
            }
        }
    }
}

/// Re-enable the physical device owning the sysfs node at `path`
pub fn enable_device(config: &AgentConfig, path: &Path) -> Result<bool> {
    let host = Arc::new(SysfsHost::with_root_path(config.sysfs_root.clone()));
    let node = host.node_for_path(path)?;
    let enforcer = Enforcer::new(host, config.persist_disable);
    let enabled = enforcer.enable_container(node);
    if !enabled {
        warn!(path = %path.display(), "Device could not be re-enabled");
    }
    Ok(enabled)
}

/// Parse a policy document without touching any device
pub fn check_policy(path: &Path) -> Result<RuleSummary> {
    PolicyEngine::new().load_file(path)
}

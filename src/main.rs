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

//! Devgate agent (devgated)
//!
//! Watches USB attach/detach events, resolves each interface to the physical
//! device it belongs to, and disables devices the policy blocks.
//!
//! # Runtime
//! - **Privilege**: runs as root, `authorized` attributes in /sys are root-only
//! - **Events**: kernel uevents over netlink, one reader thread and one worker thread
//! - **Policy**: JSON document, polled for changes while running
//! - **Audit**: JSON-lines event log per day plus journald/stdout logging

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use devgate::cli::{self, Action, VERSION};
use devgate::config::{config_path, load_agent_config};
use devgate::logger::JsonEventLog;
use devgate::service::{check_policy, enable_device, run_agent};
use dg_core::constants::paths;
use dg_core::AuditSink;

/// Verify we're running as root
fn verify_privileges() -> Result<(), &'static str> {
    // SAFETY: geteuid is always safe - it just returns the process's effective user ID.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err("Agent must run as root (euid=0) to change device authorization");
    }
    Ok(())
}

/// Returns whether journald is in use
fn init_logging(log_level: &str) -> bool {
    if Path::new(paths::JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

fn main() -> anyhow::Result<()> {
    // PHASE 0: Panic hook, so a crash in any thread is visible in the journal
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    // PHASE 1: Parse arguments
    let args = match cli::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            cli::print_help();
            std::process::exit(1);
        }
    };
    match args.action {
        Action::Help => {
            cli::print_help();
            return Ok(());
        }
        Action::Version => {
            cli::print_version();
            return Ok(());
        }
        _ => {}
    }

    // PHASE 2: Agent configuration
    let config_file = config_path(args.config.as_deref());
    let mut config = load_agent_config(&config_file)
        .with_context(|| format!("loading agent config {}", config_file.display()))?;
    if let Some(policy) = args.policy.clone() {
        config.policy_path = policy;
    }

    // PHASE 3: Logging
    let log_level = config.effective_log_level();
    let use_journald = init_logging(&log_level);

    // PHASE 4: One-shot commands
    match &args.action {
        Action::CheckPolicy(path) => {
            let summary = check_policy(path).with_context(|| format!("checking policy {}", path.display()))?;
            println!(
                "{}: ok ({} whitelist, {} blacklist, default={}, blacklist action={})",
                path.display(),
                summary.whitelist,
                summary.blacklist,
                summary.default_action,
                summary.blacklist_action
            );
            return Ok(());
        }
        Action::Enable(path) => {
            if let Err(e) = verify_privileges() {
                error!("{}", e);
                std::process::exit(1);
            }
            let enabled = enable_device(&config, path).with_context(|| format!("enabling {}", path.display()))?;
            if !enabled {
                std::process::exit(1);
            }
            info!(path = %path.display(), "Device re-enabled");
            return Ok(());
        }
        _ => {}
    }

    info!("STARTUP: devgated {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });
    info!("STARTUP: Config: {}", config_file.display());
    info!("STARTUP: Policy: {}", config.policy_path.display());

    // PHASE 5: Privilege check
    if let Err(e) = verify_privileges() {
        error!("{}", e);
        std::process::exit(1);
    }

    // PHASE 6: Signal handlers
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        shutdown_signal.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    // PHASE 7: Event log
    let event_log = Arc::new(JsonEventLog::new(&config.log_dir));
    if let Some(path) = event_log.current_path() {
        info!("STARTUP: Event log: {}", path.display());
    }
    let audit: Arc<dyn AuditSink> = event_log;

    // PHASE 8: Run until signalled
    run_agent(&config, audit, shutdown).context("agent terminated with an error")?;

    info!("SHUTDOWN: Agent terminated gracefully");
    Ok(())
}

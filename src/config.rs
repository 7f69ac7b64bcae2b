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

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dg_core::constants::{defaults, env as env_vars, limits, paths};
use dg_core::data::read_bounded;
use dg_error::{DevgateError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Policy document to enforce
    pub policy_path: PathBuf,
    /// Directory for the daily JSON event logs
    pub log_dir: PathBuf,
    /// Log filter; `DEVGATE_LOG` wins when set
    pub log_level: String,
    /// Ask for disables that survive a reboot
    pub persist_disable: bool,
    /// Evaluate devices that were attached before the agent started
    pub enforce_present_devices: bool,
    /// Policy file poll interval in seconds, 0 turns hot reload off
    pub policy_reload_secs: u64,
    /// Directory containing `sys/`
    pub sysfs_root: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            policy_path: PathBuf::from(paths::POLICY_FILE),
            log_dir: PathBuf::from(paths::LOG_DIR),
            log_level: defaults::LOG_LEVEL.to_string(),
            persist_disable: false,
            enforce_present_devices: false,
            policy_reload_secs: defaults::POLICY_RELOAD_SECS,
            sysfs_root: PathBuf::from(paths::SYSFS_ROOT),
        }
    }
}

impl AgentConfig {
    pub fn reload_interval(&self) -> Option<Duration> {
        (self.policy_reload_secs > 0).then(|| Duration::from_secs(self.policy_reload_secs))
    }

    /// Log filter after applying the environment override
    pub fn effective_log_level(&self) -> String {
        env::var(env_vars::LOG)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.log_level.clone())
    }
}

/// Config file location: explicit path, then `DEVGATE_CONFIG`, then the system default
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = env::var(env_vars::CONFIG) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(paths::AGENT_CONFIG_FILE)
}

/// Load and validate the agent config; a missing file means defaults
pub fn load_agent_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        return Ok(AgentConfig::default());
    }
    let text = read_bounded(path, limits::MAX_CONFIG_SIZE)?;
    let config: AgentConfig = serde_json::from_str(&text)
        .map_err(|e| DevgateError::config(format!("{}: {}", path.display(), e)))?;
    validate_agent_config(&config)?;
    Ok(config)
}

pub fn validate_agent_config(config: &AgentConfig) -> Result<()> {
    for (field, value) in [("policy_path", &config.policy_path), ("log_dir", &config.log_dir), ("sysfs_root", &config.sysfs_root)] {
        if !value.is_absolute() {
            return Err(DevgateError::InvalidConfig {
                field: field.to_string(),
                reason: format!("{} must be an absolute path", value.display()),
            });
        }
    }

    if config.policy_reload_secs > limits::MAX_RELOAD_SECS {
        return Err(DevgateError::InvalidConfig {
            field: "policy_reload_secs".to_string(),
            reason: format!("{} exceeds {} seconds", config.policy_reload_secs, limits::MAX_RELOAD_SECS),
        });
    }

    if config.log_level.trim().is_empty() {
        return Err(DevgateError::InvalidConfig {
            field: "log_level".to_string(),
            reason: "must not be empty".to_string(),
        });
    }

    Ok(())
}

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

//! Append-only JSON-lines event log, one file per local day

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use parking_lot::Mutex;
use serde_json::json;

use dg_core::audit::forward_to_tracing;
use dg_core::constants::paths;
use dg_core::{AuditLevel, AuditSink};

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn today() -> String {
    Local::now().format("%Y%m%d").to_string()
}

fn file_name(day: &str) -> String {
    format!("{}{}{}", paths::EVENT_LOG_PREFIX, day, paths::EVENT_LOG_SUFFIX)
}

struct OpenLog {
    day: String,
    path: PathBuf,
    file: File,
}

/// [`AuditSink`] writing `{"ts_ms","level","event_id","message"}` lines
///
/// Every record is also forwarded to `tracing`. File failures are silent.
pub struct JsonEventLog {
    dir: PathBuf,
    current: Mutex<Option<OpenLog>>,
}

impl JsonEventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    /// File the next record will be appended to, if one could be opened
    pub fn current_path(&self) -> Option<PathBuf> {
        let mut guard = self.current.lock();
        self.ensure_open(&mut guard);
        guard.as_ref().map(|log| log.path.clone())
    }

    fn ensure_open(&self, slot: &mut Option<OpenLog>) {
        let day = today();
        if slot.as_ref().is_some_and(|log| log.day == day) {
            return;
        }
        *slot = open_in(&self.dir, &day).or_else(|| open_in(Path::new(paths::FALLBACK_LOG_DIR), &day));
    }

    fn append(&self, line: &str) {
        let mut guard = self.current.lock();
        self.ensure_open(&mut guard);
        if let Some(log) = guard.as_mut() {
            let _ = writeln!(log.file, "{}", line);
        }
    }
}

fn open_in(dir: &Path, day: &str) -> Option<OpenLog> {
    fs::create_dir_all(dir).ok()?;
    let path = dir.join(file_name(day));
    let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
    Some(OpenLog {
        day: day.to_string(),
        path,
        file,
    })
}

impl AuditSink for JsonEventLog {
    fn record(&self, level: AuditLevel, event_id: u32, message: &str) {
        forward_to_tracing(level, event_id, message);

        let line = json!({
            "ts_ms": now_millis(),
            "level": level,
            "event_id": event_id,
            "message": message,
        })
        .to_string();
        self.append(&line);
    }
}

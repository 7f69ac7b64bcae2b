//! Per-container decision state
//!
//! Invariants kept by every mutation:
//! - a container is in at most one of `allowed` / `blocked`
//! - `ref_count[c]` equals the number of live paths mapped to `c`, and is never 0
//! - a container whose count reaches 0 is purged from all three maps

use std::collections::{HashMap, HashSet};

use crate::data::Guid;

#[derive(Debug, Default)]
pub(crate) struct PolicyState {
    allowed: HashSet<Guid>,
    blocked: HashSet<Guid>,
    path_to_container: HashMap<String, Guid>,
    ref_count: HashMap<Guid, u32>,
}

/// Paths are compared ignoring case, like interface paths everywhere else
fn path_key(path: &str) -> String {
    path.to_lowercase()
}

impl PolicyState {
    /// Sticky decision for a container: `Some(true)` allowed, `Some(false)` blocked
    pub(crate) fn decision(&self, container: &Guid) -> Option<bool> {
        if self.allowed.contains(container) {
            Some(true)
        } else if self.blocked.contains(container) {
            Some(false)
        } else {
            None
        }
    }

    pub(crate) fn is_mapped(&self, path: &str, container: &Guid) -> bool {
        self.path_to_container.get(&path_key(path)) == Some(container)
    }

    pub(crate) fn record_arrival(&mut self, path: &str, container: Guid, allowed: bool) {
        match self.path_to_container.insert(path_key(path), container) {
            Some(previous) if previous == container => {}
            Some(previous) => {
                self.release(previous);
                *self.ref_count.entry(container).or_insert(0) += 1;
            }
            None => {
                *self.ref_count.entry(container).or_insert(0) += 1;
            }
        }

        if allowed {
            self.allowed.insert(container);
            self.blocked.remove(&container);
        } else {
            self.blocked.insert(container);
            self.allowed.remove(&container);
        }
    }

    /// Forget a path; returns the container it was mapped to
    pub(crate) fn record_removal(&mut self, path: &str) -> Option<Guid> {
        let container = self.path_to_container.remove(&path_key(path))?;
        self.release(container);
        Some(container)
    }

    fn release(&mut self, container: Guid) {
        if let Some(count) = self.ref_count.get_mut(&container) {
            *count -= 1;
            if *count == 0 {
                self.ref_count.remove(&container);
                self.allowed.remove(&container);
                self.blocked.remove(&container);
            }
        }
    }

    pub(crate) fn allowed(&self) -> impl Iterator<Item = &Guid> {
        self.allowed.iter()
    }

    pub(crate) fn blocked(&self) -> impl Iterator<Item = &Guid> {
        self.blocked.iter()
    }

    pub(crate) fn ref_counts(&self) -> &HashMap<Guid, u32> {
        &self.ref_count
    }

    pub(crate) fn mapped_paths(&self) -> usize {
        self.path_to_container.len()
    }
}

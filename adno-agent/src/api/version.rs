//! Configuration version store.
//!
//! Holds the latest configuration version the agent has observed. The task
//! poller reports it on every poll so the control plane can piggyback a new
//! configuration when its version differs; the supervisor reads it for
//! heartbeats. The lock is held only for the copy.

use std::sync::Mutex;

/// Shared store for the most recently observed configuration version.
#[derive(Debug, Default)]
pub struct ConfigVersionStore {
    version: Mutex<Option<String>>,
}

impl ConfigVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last recorded version, if any.
    pub fn current(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Records `version` and reports whether it differs from the previous
    /// value. The version is opaque; inequality means "changed".
    pub fn record(&self, version: &str) -> bool {
        let mut current = self.lock();
        let changed = current.as_deref() != Some(version);
        if changed {
            *current = Some(version.to_string());
        }
        changed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.version.lock().unwrap_or_else(|e| e.into_inner())
    }
}

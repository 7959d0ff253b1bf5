//! State shared between the supervisor, dispatcher, and heartbeat loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::api::AgentConfig;

use super::inflight::InFlightTable;

/// Runtime-wide shared state.
///
/// The configuration is replaced wholesale by the supervisor; readers take a
/// snapshot and never observe a partially applied config.
#[derive(Debug)]
pub(crate) struct RuntimeShared {
    config: RwLock<Arc<AgentConfig>>,
    pub in_flight: Arc<InFlightTable>,
    pub started_at: Instant,
    shutting_down: AtomicBool,
}

impl RuntimeShared {
    pub fn new(initial: AgentConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(initial)),
            in_flight: Arc::new(InFlightTable::new()),
            started_at: Instant::now(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Snapshot of the active configuration.
    pub fn config_snapshot(&self) -> Arc<AgentConfig> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Atomically replaces the active configuration.
    pub fn store_config(&self, config: AgentConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

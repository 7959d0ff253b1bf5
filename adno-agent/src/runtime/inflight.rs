//! In-flight task tracking.
//!
//! [`InFlightTable`] is the shared ledger of task executions: the dispatcher
//! reserves a slot before spawning an execution, and the supervisor trips
//! every registered cancellation token and waits for the table to drain
//! during shutdown. Slot release is RAII via [`InFlightGuard`] so a panicking
//! handler still frees its slot on unwind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Ledger of currently executing tasks and their cancellation tokens.
#[derive(Debug, Default)]
pub struct InFlightTable {
    tasks: Mutex<HashMap<String, CancellationToken>>,
    drained: Notify,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently in flight (including reserved slots whose
    /// claim is still pending).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of everything currently in flight, for shutdown reporting.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Trips every registered cancellation token. Non-blocking.
    pub fn cancel_all(&self) {
        for token in self.lock().values() {
            token.cancel();
        }
    }

    /// Resolves once the table is empty. Usable concurrently with releases.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, id: &str) {
        let mut tasks = self.lock();
        tasks.remove(id);
        if tasks.is_empty() {
            self.drained.notify_waiters();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// RAII reservation of one in-flight slot.
///
/// Dropping the guard removes the task from the table, on every exit path
/// including panic unwinds.
#[derive(Debug)]
pub struct InFlightGuard {
    table: Arc<InFlightTable>,
    id: String,
}

impl InFlightGuard {
    /// Reserves a slot for `id`. Returns `None` if a task with this id is
    /// already in flight.
    pub fn try_reserve(
        table: &Arc<InFlightTable>,
        id: &str,
        token: CancellationToken,
    ) -> Option<Self> {
        {
            let mut tasks = table.lock();
            if tasks.contains_key(id) {
                return None;
            }
            tasks.insert(id.to_string(), token);
        }
        Some(Self {
            table: Arc::clone(table),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.table.release(&self.id);
    }
}

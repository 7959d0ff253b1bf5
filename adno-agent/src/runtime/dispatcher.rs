//! Task dispatcher: the poll/claim/execute loop.
//!
//! On each tick the dispatcher computes how many execution slots are free,
//! asks the control plane for that many tasks, and spawns one bounded
//! execution per returned task:
//!
//! ```text
//! tick ──► available = cap − in_flight
//!    │        │ 0: successful no-op (resets backoff)
//!    │        ▼
//!    │     poll_tasks(available) ──► piggyback config ──► supervisor
//!    │        │
//!    │        ▼  per task, up to `available`
//!    │     reserve slot ► claim ► task_started ► handler ► complete/fail
//!    │                      │ rejected: release slot, no side effects
//!    ▼
//! poll failures back the interval off exponentially, capped at one hour;
//! one successful tick restores the configured interval.
//! ```
//!
//! Slot reservation happens before the claim so the in-flight count can
//! never exceed the configured cap, and release is RAII so panicking
//! handlers still free their slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{AgentConfig, AgentTask, ControlPlaneClient, Signal, WorkspaceConfig};
use crate::config::ExternalCredentials;
use crate::transport::TransportError;

use super::inflight::InFlightGuard;
use super::registry::{HandlerContext, HandlerRegistry};
use super::shared::RuntimeShared;

/// Ceiling for the backed-off poll interval.
pub const MAX_POLL_BACKOFF: Duration = Duration::from_secs(3600);

/// Computes the poll delay after `failures` consecutive poll failures.
///
/// `min(base * 2^failures, 1h)`; zero failures means the configured base.
pub(crate) fn backoff_delay(base: Duration, failures: u32) -> Duration {
    let delay = base.saturating_mul(1u32 << failures.min(16));
    delay.min(MAX_POLL_BACKOFF)
}

/// The poll/claim/execute engine. One instance runs per agent runtime.
pub(crate) struct TaskDispatcher {
    client: Arc<ControlPlaneClient>,
    registry: Arc<HandlerRegistry>,
    shared: Arc<RuntimeShared>,
    workspace: Arc<WorkspaceConfig>,
    credentials: Arc<ExternalCredentials>,
    /// Piggybacked configurations are handed to the supervisor through this
    /// channel; applying them re-entrantly here would deadlock reconciliation.
    config_tx: mpsc::UnboundedSender<AgentConfig>,
    /// Poked by the supervisor when the poll interval changes; triggers an
    /// immediate poll and picks up the new interval.
    poke: Arc<Notify>,
}

impl TaskDispatcher {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        registry: Arc<HandlerRegistry>,
        shared: Arc<RuntimeShared>,
        workspace: Arc<WorkspaceConfig>,
        credentials: Arc<ExternalCredentials>,
        config_tx: mpsc::UnboundedSender<AgentConfig>,
        poke: Arc<Notify>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            registry,
            shared,
            workspace,
            credentials,
            config_tx,
            poke,
        })
    }

    /// Runs the poll loop until shutdown. The first poll happens one full
    /// interval after start; an interval change triggers an immediate poll.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut failures: u32 = 0;
        let base = self.poll_interval();
        let mut next = Instant::now() + base;
        debug!(interval_ms = base.as_millis() as u64, "Task dispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Task dispatcher stopped");
                    break;
                }

                _ = self.poke.notified() => {
                    debug!("Poll interval changed; polling immediately");
                    next = Instant::now();
                }

                _ = tokio::time::sleep_until(next) => {
                    let base = self.poll_interval();
                    let delay = match Self::poll_once(&self, &shutdown).await {
                        Ok(()) => {
                            if failures > 0 {
                                info!(after_failures = failures, "Task polling recovered");
                            }
                            failures = 0;
                            base
                        }
                        Err(err) => {
                            failures += 1;
                            let delay = backoff_delay(base, failures);
                            warn!(
                                consecutive_failures = failures,
                                next_poll_ms = delay.as_millis() as u64,
                                error = %err,
                                "Task poll failed; backing off"
                            );
                            delay
                        }
                    };
                    next = Instant::now() + delay;
                }
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.shared.config_snapshot().task_poll_interval_ms)
    }

    /// One poll tick: fetch up to `available` tasks and spawn executions.
    async fn poll_once(
        this: &Arc<Self>,
        shutdown: &CancellationToken,
    ) -> Result<(), TransportError> {
        if this.shared.is_shutting_down() {
            return Ok(());
        }

        let config = this.shared.config_snapshot();
        let in_flight = this.shared.in_flight.len();
        let available = config.max_concurrent_tasks.saturating_sub(in_flight);
        if available == 0 {
            debug!(
                in_flight,
                cap = config.max_concurrent_tasks,
                "At capacity; skipping poll"
            );
            return Ok(());
        }

        let response = this.client.poll_tasks(available).await?;

        if let Some(new_config) = response.config {
            debug!(version = %new_config.version, "Poll carried a configuration update");
            let _ = this.config_tx.send(new_config);
        }

        for task in response.tasks.into_iter().take(available) {
            if shutdown.is_cancelled() || this.shared.is_shutting_down() {
                break;
            }

            let token = CancellationToken::new();
            let Some(guard) =
                InFlightGuard::try_reserve(&this.shared.in_flight, &task.id, token.clone())
            else {
                debug!(task_id = %task.id, "Task already in flight; skipping");
                continue;
            };

            let dispatcher = Arc::clone(this);
            tokio::spawn(async move {
                dispatcher.execute_task(task, token, guard).await;
            });
        }

        Ok(())
    }

    /// Claims and executes one task, reporting the outcome. The guard keeps
    /// the in-flight slot reserved for the whole execution and releases it on
    /// every exit path.
    async fn execute_task(
        self: Arc<Self>,
        task: AgentTask,
        token: CancellationToken,
        _guard: InFlightGuard,
    ) {
        // Shutdown may have started between reservation and execution; do
        // not claim work the agent will immediately abandon.
        if self.shared.is_shutting_down() || token.is_cancelled() {
            return;
        }

        let Some(task) = self.client.claim_task(&task.id).await else {
            // Another agent won the claim; no signals, no side effects.
            return;
        };

        info!(task_id = %task.id, task_type = %task.kind, "Task claimed");
        self.client.send_signal(Signal::task_started(&task)).await;

        let Some(handler) = self.registry.get(task.kind) else {
            error!(task_id = %task.id, task_type = %task.kind, "No handler registered for task type");
            let message = format!("no handler registered for task type '{}'", task.kind);
            self.client.fail_task(&task.id, &message, false).await;
            self.client
                .send_signal(Signal::task_failed(&task, &message))
                .await;
            return;
        };

        let ctx = HandlerContext {
            config: self.shared.config_snapshot(),
            workspace: Arc::clone(&self.workspace),
            credentials: Arc::clone(&self.credentials),
            client: Arc::clone(&self.client),
            cancellation: token.clone(),
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = handler.execute(&task, &ctx) => Some(result),
        };

        match outcome {
            None => {
                info!(task_id = %task.id, "Task cancelled during shutdown");
                self.client
                    .fail_task(&task.id, "Task cancelled during shutdown", false)
                    .await;
            }
            Some(Ok(result)) => {
                info!(task_id = %task.id, task_type = %task.kind, "Task completed");
                self.client.complete_task(&task.id, result).await;
                self.client
                    .send_signal(Signal::task_completed(&task))
                    .await;
            }
            Some(Err(err)) => {
                warn!(task_id = %task.id, task_type = %task.kind, error = %err, "Task failed");
                self.client.fail_task(&task.id, &err.message, true).await;
                self.client
                    .send_signal(Signal::task_failed(&task, &err.message))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_failure() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(120));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(240));
    }

    #[test]
    fn backoff_is_capped_at_one_hour() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 7), MAX_POLL_BACKOFF);
        assert_eq!(backoff_delay(base, 30), MAX_POLL_BACKOFF);
    }

    #[test]
    fn backoff_cap_survives_huge_failure_counts() {
        // Shift amount saturates instead of overflowing.
        let base = Duration::from_millis(5000);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_POLL_BACKOFF);
    }
}

//! Periodic worker schedulers.
//!
//! A [`WorkerScheduler`] is the task *producer* for one scheduled worker
//! kind: every interval it asks the control plane to enqueue a task of that
//! kind, starting with one immediately on start. It never executes tasks;
//! that is the dispatcher's job.
//!
//! Stopping a scheduler is cooperative: a stopped scheduler fires no further
//! iterations, but an iteration already in flight is allowed to complete and
//! its result is discarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ControlPlaneClient, CreateTaskStatus, WorkerKind, PRIORITY_NORMAL};

/// Handle to one running scheduler loop.
#[derive(Debug)]
pub struct WorkerScheduler {
    kind: WorkerKind,
    interval: Duration,
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl WorkerScheduler {
    /// Spawns a scheduler that creates one task immediately and then one per
    /// `interval`.
    pub fn start(kind: WorkerKind, interval: Duration, client: Arc<ControlPlaneClient>) -> Self {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        info!(
            worker = %kind,
            interval_ms = interval.as_millis() as u64,
            "Starting worker scheduler"
        );

        let handle = tokio::spawn(async move {
            run_loop(kind, interval, client, loop_token).await;
        });

        Self {
            kind,
            interval,
            token,
            _handle: handle,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Requests the loop to stop. No further iterations fire; an in-flight
    /// iteration completes and its result is discarded.
    pub fn stop(&self) {
        info!(worker = %self.kind, "Stopping worker scheduler");
        self.token.cancel();
    }
}

async fn run_loop(
    kind: WorkerKind,
    interval: Duration,
    client: Arc<ControlPlaneClient>,
    token: CancellationToken,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(worker = %kind, "Worker scheduler stopped");
                break;
            }

            // The first tick fires immediately, giving the create-on-start
            // behavior for both initial start and interval restarts.
            _ = timer.tick() => {
                create_once(kind, &client).await;
            }
        }
    }
}

async fn create_once(kind: WorkerKind, client: &ControlPlaneClient) {
    match client
        .create_task(kind, PRIORITY_NORMAL, serde_json::json!({}))
        .await
    {
        Some(created) if created.status == CreateTaskStatus::AlreadyPending => {
            debug!(worker = %kind, task_id = %created.task_id, "Task already pending");
        }
        Some(created) => {
            debug!(worker = %kind, task_id = %created.task_id, "Scheduled task created");
        }
        // The client already logged the failure; the next interval retries.
        None => {}
    }
}

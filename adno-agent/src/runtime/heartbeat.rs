//! Heartbeat loop.
//!
//! Sends a `heartbeat` signal every `heartbeat_interval_ms`, starting with
//! one immediately on spawn. The supervisor restarts this loop whenever the
//! interval changes, which also yields the immediate beat required after a
//! reconfiguration. Send failures are logged by the client and ignored; the
//! next interval tries again.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ControlPlaneClient, Signal};
use crate::system;

use super::shared::RuntimeShared;

/// Spawns the heartbeat loop at the interval in the current configuration.
pub(crate) fn spawn(
    shared: Arc<RuntimeShared>,
    client: Arc<ControlPlaneClient>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval_ms = shared.config_snapshot().heartbeat_interval_ms;
        let mut timer =
            tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(interval_ms, "Heartbeat loop started");

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("Heartbeat loop stopped");
                    break;
                }

                // First tick fires immediately.
                _ = timer.tick() => {
                    beat(&shared, &client).await;
                }
            }
        }
    })
}

async fn beat(shared: &RuntimeShared, client: &ControlPlaneClient) {
    let config = shared.config_snapshot();
    let memory = system::memory_usage();
    let payload = json!({
        "agent_version": crate::VERSION,
        "config_version": config.version,
        "in_flight": shared.in_flight.len(),
        "max_concurrent_tasks": config.max_concurrent_tasks,
        "uptime_secs": shared.started_at.elapsed().as_secs(),
        "memory": {
            "resident_bytes": memory.resident_bytes,
            "virtual_bytes": memory.virtual_bytes,
        },
    });
    client.send_signal(Signal::heartbeat(payload)).await;
}

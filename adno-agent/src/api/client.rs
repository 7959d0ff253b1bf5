//! Typed control-plane client.
//!
//! [`ControlPlaneClient`] is the only component that speaks the wire
//! protocol; everything above it works with typed results. Propagation
//! policy: operations that feed the dispatcher's backoff (`poll_tasks`,
//! `get_config`) return `Result`, while fire-and-forget operations
//! (create/claim/complete/fail/signals) log once and collapse to
//! `Option`/`bool` so caller loops never terminate on a transient failure.
//!
//! The client is safe for concurrent use: its state is either immutable
//! after construction or delegated to components that own their own
//! synchronization (the transport chain and the version store).

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{
    AgentConfig, AgentTask, CreateTaskRequest, CreateTaskResponse, Signal, TaskPollResponse,
    WorkerKind, WorkspaceConfig,
};
use super::version::ConfigVersionStore;
use crate::transport::{ApiRequest, ApiTransport, TransportError};

const CONFIG_PATH: &str = "/api/agent/config";
const WORKSPACE_CONFIG_PATH: &str = "/api/agent/workspace-config";
const TASKS_PATH: &str = "/api/agent/tasks";
const SIGNAL_PATH: &str = "/api/agent/signal";

/// Startup authentication failures. Any of these is fatal to the process.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("control plane rejected the API credential (401)")]
    InvalidCredential,
    #[error("API credential is valid but lacks agent permissions (403)")]
    Forbidden,
    #[error("control plane unreachable during authentication: {0}")]
    Infra(TransportError),
}

/// Typed operations against the control plane.
pub struct ControlPlaneClient {
    transport: Arc<dyn ApiTransport>,
    versions: Arc<ConfigVersionStore>,
}

impl ControlPlaneClient {
    pub fn new(transport: Arc<dyn ApiTransport>, versions: Arc<ConfigVersionStore>) -> Self {
        Self {
            transport,
            versions,
        }
    }

    pub fn versions(&self) -> &Arc<ConfigVersionStore> {
        &self.versions
    }

    /// Validates the credential by fetching the configuration endpoint.
    /// Success seeds the version store.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        match self.transport.send(ApiRequest::get(CONFIG_PATH)).await {
            Ok(response) => {
                if let Ok(config) = response.decode::<AgentConfig>() {
                    self.versions.record(&config.version);
                }
                Ok(())
            }
            Err(TransportError::Http { status: 401, .. }) => Err(AuthError::InvalidCredential),
            Err(TransportError::Http { status: 403, .. }) => Err(AuthError::Forbidden),
            Err(err) => Err(AuthError::Infra(err)),
        }
    }

    /// Fetches the full agent configuration and records its version.
    pub async fn get_config(&self) -> Result<AgentConfig, TransportError> {
        let response = self.transport.send(ApiRequest::get(CONFIG_PATH)).await?;
        let config: AgentConfig = response.decode()?;
        self.versions.record(&config.version);
        Ok(config)
    }

    /// Fetches handler credentials for external systems.
    pub async fn get_workspace_config(&self) -> Result<WorkspaceConfig, TransportError> {
        let response = self
            .transport
            .send(ApiRequest::get(WORKSPACE_CONFIG_PATH))
            .await?;
        response.decode()
    }

    /// Polls for up to `limit` claimable tasks, reporting the known
    /// configuration version so the server can piggyback an update. A
    /// piggybacked configuration is recorded in the version store and
    /// surfaced to the caller for reconciliation.
    pub async fn poll_tasks(&self, limit: usize) -> Result<TaskPollResponse, TransportError> {
        let mut path = format!("{}?limit={}", TASKS_PATH, limit);
        if let Some(version) = self.versions.current() {
            path.push_str("&config_version=");
            path.push_str(&version);
        }

        let response = self.transport.send(ApiRequest::get(path)).await?;
        let poll: TaskPollResponse = response.decode()?;
        if let Some(config) = &poll.config {
            self.versions.record(&config.version);
        }
        Ok(poll)
    }

    /// Asks the control plane to enqueue a task. Returns `None` after
    /// logging when the request fails; `already_pending` is a success.
    pub async fn create_task(
        &self,
        kind: WorkerKind,
        priority: i64,
        payload: Value,
    ) -> Option<CreateTaskResponse> {
        let request = CreateTaskRequest {
            kind,
            priority,
            payload,
        };
        let body = match serde_json::to_value(&request) {
            Ok(body) => body,
            Err(e) => {
                warn!(task_type = %kind, error = %e, "Failed to encode create-task request");
                return None;
            }
        };

        match self.transport.send(ApiRequest::post(TASKS_PATH, body)).await {
            Ok(response) => match response.decode::<CreateTaskResponse>() {
                Ok(created) => Some(created),
                Err(err) => {
                    warn!(task_type = %kind, error = %err, "Create-task response was malformed");
                    None
                }
            },
            Err(err) => {
                warn!(task_type = %kind, error = %err, "Failed to create task");
                None
            }
        }
    }

    /// Attempts to atomically claim a task. Returns the task on success and
    /// `None` when another agent got there first (or the call failed).
    pub async fn claim_task(&self, id: &str) -> Option<AgentTask> {
        let path = format!("{}/{}/claim", TASKS_PATH, id);
        match self.transport.send(ApiRequest::post(path, Value::Null)).await {
            Ok(response) => match response.decode::<AgentTask>() {
                Ok(task) => Some(task),
                Err(err) => {
                    warn!(task_id = %id, error = %err, "Claim response was malformed");
                    None
                }
            },
            // 404/409/410: the task is gone or already claimed by another
            // agent. Not an error from this agent's perspective.
            Err(TransportError::Http {
                status: 404 | 409 | 410,
                ..
            }) => {
                debug!(task_id = %id, "Task claim rejected");
                None
            }
            Err(err) => {
                warn!(task_id = %id, error = %err, "Failed to claim task");
                None
            }
        }
    }

    /// Reports a claimed task as completed with the handler's result object.
    pub async fn complete_task(&self, id: &str, result: Value) -> bool {
        let path = format!("{}/{}/complete", TASKS_PATH, id);
        let body = json!({ "result": result });
        match self.transport.send(ApiRequest::post(path, body)).await {
            Ok(_) => true,
            Err(err) => {
                warn!(task_id = %id, error = %err, "Failed to report task completion");
                false
            }
        }
    }

    /// Reports a claimed task as failed. Retryable failures are re-queued by
    /// the server after a delay; non-retryable failures are terminal.
    pub async fn fail_task(&self, id: &str, error: &str, retryable: bool) -> bool {
        let path = format!("{}/{}/fail", TASKS_PATH, id);
        let body = json!({ "error": error, "retryable": retryable });
        match self.transport.send(ApiRequest::post(path, body)).await {
            Ok(_) => true,
            Err(err) => {
                warn!(task_id = %id, error = %err, "Failed to report task failure");
                false
            }
        }
    }

    /// Batch-sends lifecycle events and log entries.
    pub async fn send_signals(&self, signals: &[Signal]) -> bool {
        let body = match serde_json::to_value(signals) {
            Ok(body) => json!({ "signals": body }),
            Err(e) => {
                warn!(error = %e, "Failed to encode signal batch");
                return false;
            }
        };
        match self.transport.send(ApiRequest::post(SIGNAL_PATH, body)).await {
            Ok(_) => true,
            Err(err) => {
                warn!(count = signals.len(), error = %err, "Failed to send signals");
                false
            }
        }
    }

    /// Sends a single signal.
    pub async fn send_signal(&self, signal: Signal) -> bool {
        self.send_signals(std::slice::from_ref(&signal)).await
    }
}

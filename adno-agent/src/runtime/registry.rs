//! Task handler registry.
//!
//! Maps a worker-type tag to the capability that executes one task of that
//! type. The runtime never inspects a handler's result object; it only
//! forwards it to the control plane. The registry is populated at startup
//! and immutable afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{AgentConfig, AgentTask, ControlPlaneClient, WorkerKind, WorkspaceConfig};
use crate::config::ExternalCredentials;

/// Failure raised by a task handler. Reported to the control plane as a
/// retryable task failure with this message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Everything a handler may need for one task execution.
///
/// The cancellation token is advisory: handlers should check it at I/O
/// boundaries and return promptly once it is set. The runtime never kills a
/// handler forcibly.
pub struct HandlerContext {
    /// Snapshot of the agent configuration active at dispatch time.
    pub config: Arc<AgentConfig>,
    /// Workspace credentials loaded at startup.
    pub workspace: Arc<WorkspaceConfig>,
    /// Optional external-system credentials from the environment.
    pub credentials: Arc<ExternalCredentials>,
    /// Control-plane client, e.g. for handlers that enqueue follow-up tasks.
    pub client: Arc<ControlPlaneClient>,
    /// Tripped when the runtime wants this execution to stop.
    pub cancellation: CancellationToken,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Capability that executes one task of a given worker type.
pub trait TaskHandler: Send + Sync {
    /// Executes `task`, producing an opaque result object for the control
    /// plane or a failure.
    fn execute<'a>(
        &'a self,
        task: &'a AgentTask,
        ctx: &'a HandlerContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>>;
}

/// Startup-time mapping from worker kind to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<WorkerKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous registration.
    pub fn register(mut self, kind: WorkerKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Worker kinds with a registered handler.
    pub fn kinds(&self) -> Vec<WorkerKind> {
        let mut kinds: Vec<WorkerKind> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

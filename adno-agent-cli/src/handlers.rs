//! Built-in placeholder task handlers.
//!
//! Real integrations (source-system sync, AI evaluation, log shipping,
//! housekeeping) are host-supplied and wired in here. Until then each
//! recognized worker kind gets a handler that acknowledges the dispatch so
//! queued tasks do not error-loop on a stock install.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use adno_agent::api::{AgentTask, WorkerKind};
use adno_agent::runtime::{HandlerContext, HandlerError, HandlerRegistry, TaskHandler};

/// Handler that logs the dispatch and reports an empty result.
struct AcknowledgeHandler;

impl TaskHandler for AcknowledgeHandler {
    fn execute<'a>(
        &'a self,
        task: &'a AgentTask,
        ctx: &'a HandlerContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(HandlerError::new("cancelled before execution"));
            }
            info!(
                task_id = %task.id,
                task_type = %task.kind,
                "No integration configured for this worker type; acknowledging task"
            );
            Ok(json!({ "acknowledged": true }))
        })
    }
}

/// Registry with a placeholder handler for every recognized worker kind.
pub fn default_registry() -> HandlerRegistry {
    let handler: Arc<dyn TaskHandler> = Arc::new(AcknowledgeHandler);
    WorkerKind::ALL
        .into_iter()
        .fold(HandlerRegistry::new(), |registry, kind| {
            registry.register(kind, Arc::clone(&handler))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_worker_kind_has_a_handler() {
        let registry = default_registry();
        for kind in WorkerKind::ALL {
            assert!(registry.get(kind).is_some(), "missing handler for {}", kind);
        }
    }
}

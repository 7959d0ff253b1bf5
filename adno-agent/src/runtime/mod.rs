//! The agent runtime: supervisor, dispatcher, schedulers, and the handler
//! registry.
//!
//! See [`AgentRuntime`] for the lifecycle contract. In short: schedulers
//! *create* tasks, the dispatcher *claims and executes* them under a
//! concurrency cap, and the supervisor owns configuration reconciliation
//! and graceful shutdown.

mod dispatcher;
mod heartbeat;
mod inflight;
mod registry;
mod scheduler;
mod shared;
mod supervisor;

pub use dispatcher::MAX_POLL_BACKOFF;
pub use inflight::{InFlightGuard, InFlightTable};
pub use registry::{HandlerContext, HandlerError, HandlerRegistry, TaskHandler};
pub use scheduler::WorkerScheduler;
pub use supervisor::{AgentRuntime, InitialSettings, StartError, SHUTDOWN_DRAIN};

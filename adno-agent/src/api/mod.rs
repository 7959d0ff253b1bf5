//! Control-plane protocol: wire types, typed client, and version tracking.

mod client;
mod types;
mod version;

pub use client::{AuthError, ControlPlaneClient};
pub use types::{
    AgentConfig, AgentTask, CreateTaskRequest, CreateTaskResponse, CreateTaskStatus, Severity,
    Signal, SignalCategory, TaskPollResponse, VersionInfo, WorkerKind, WorkerSettings,
    WorkspaceConfig, PRIORITY_NORMAL,
};
pub use version::ConfigVersionStore;

//! Wire types for the control-plane protocol.
//!
//! Everything the agent exchanges with the control plane is defined here:
//! the versioned [`AgentConfig`], queued [`AgentTask`]s, and the out-of-band
//! [`Signal`] stream. Fields the runtime does not interpret (task payloads,
//! worker-specific settings, limits) stay as raw `serde_json::Value`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// =============================================================================
// Worker Kinds
// =============================================================================

/// The worker types recognized by this agent.
///
/// `fetcher`, `logger`, and `maintain` produce their own periodic tasks;
/// `suggestion` and `apply` are event-driven and only consume tasks queued
/// by other producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Fetcher,
    Suggestion,
    Apply,
    Logger,
    Maintain,
}

impl WorkerKind {
    /// All recognized worker kinds, in a stable order.
    pub const ALL: [WorkerKind; 5] = [
        WorkerKind::Fetcher,
        WorkerKind::Suggestion,
        WorkerKind::Apply,
        WorkerKind::Logger,
        WorkerKind::Maintain,
    ];

    /// Whether this kind runs a periodic task-creation scheduler.
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            WorkerKind::Fetcher | WorkerKind::Logger | WorkerKind::Maintain
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Fetcher => "fetcher",
            WorkerKind::Suggestion => "suggestion",
            WorkerKind::Apply => "apply",
            WorkerKind::Logger => "logger",
            WorkerKind::Maintain => "maintain",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Settings for one worker type.
///
/// The runtime reads `enabled` and `schedule_interval_ms`; everything else a
/// worker carries (log level, retention days, batch caps) is forwarded to
/// handlers untouched via `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_interval_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WorkerSettings {
    /// The scheduler interval this worker should run at, if it is enabled
    /// and carries a positive interval.
    pub fn active_schedule_interval_ms(&self) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        self.schedule_interval_ms.filter(|ms| *ms > 0)
    }

    /// Worker-specific string setting from the opaque extras.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Update advisory attached to a configuration version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub recommended_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Server-authored agent configuration. Immutable per version; the runtime
/// replaces the whole object atomically when the version changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Opaque version identifier; inequality means "changed".
    pub version: String,
    pub heartbeat_interval_ms: u64,
    pub task_poll_interval_ms: u64,
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub workers: HashMap<WorkerKind, WorkerSettings>,
    /// Opaque to the runtime; forwarded to handlers.
    #[serde(default)]
    pub limits: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_info: Option<VersionInfo>,
}

impl AgentConfig {
    pub fn worker(&self, kind: WorkerKind) -> Option<&WorkerSettings> {
        self.workers.get(&kind)
    }

    /// The scheduler plan this configuration implies: one entry per
    /// scheduled worker kind that is enabled with a positive interval.
    pub fn scheduled_workers(&self) -> HashMap<WorkerKind, u64> {
        self.workers
            .iter()
            .filter(|(kind, _)| kind.is_scheduled())
            .filter_map(|(kind, settings)| {
                settings
                    .active_schedule_interval_ms()
                    .map(|ms| (*kind, ms))
            })
            .collect()
    }
}

/// Credentials and endpoints for the external systems handlers talk to.
/// Loaded once at startup; opaque to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceConfig(pub Value);

// =============================================================================
// Tasks
// =============================================================================

/// Priority assigned to scheduler-created tasks.
pub const PRIORITY_NORMAL: i64 = 0;

/// One unit of queued work, owned by the control plane and claimed by
/// exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WorkerKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Response to a task poll. `config` is the piggyback channel: present only
/// when the server-side configuration version differs from the one the
/// agent reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPollResponse {
    #[serde(default)]
    pub tasks: Vec<AgentTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AgentConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub kind: WorkerKind,
    pub priority: i64,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateTaskStatus {
    Pending,
    /// A task of this type is already queued; expected for schedulers whose
    /// interval outpaces task consumption.
    AlreadyPending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub status: CreateTaskStatus,
}

// =============================================================================
// Signals
// =============================================================================

/// Severity attached to log-category signals and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Category grouping for signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalCategory {
    Lifecycle,
    Task,
    Log,
}

/// An out-of-band event posted to the control plane for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub category: SignalCategory,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    fn new(category: SignalCategory, kind: &str) -> Self {
        Self {
            category,
            kind: kind.to_string(),
            severity: None,
            message: None,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    pub fn agent_starting(version: &str) -> Self {
        let mut signal = Self::new(SignalCategory::Lifecycle, "agent_starting");
        signal.payload = Some(json!({ "agent_version": crate::VERSION, "config_version": version }));
        signal
    }

    pub fn agent_stopping(in_flight: usize) -> Self {
        let mut signal = Self::new(SignalCategory::Lifecycle, "agent_stopping");
        signal.payload = Some(json!({ "in_flight": in_flight }));
        signal
    }

    pub fn heartbeat(payload: Value) -> Self {
        let mut signal = Self::new(SignalCategory::Lifecycle, "heartbeat");
        signal.payload = Some(payload);
        signal
    }

    pub fn task_started(task: &AgentTask) -> Self {
        let mut signal = Self::new(SignalCategory::Task, "task_started");
        signal.payload = Some(json!({ "task_id": task.id, "task_type": task.kind }));
        signal
    }

    pub fn task_completed(task: &AgentTask) -> Self {
        let mut signal = Self::new(SignalCategory::Task, "task_completed");
        signal.payload = Some(json!({ "task_id": task.id, "task_type": task.kind }));
        signal
    }

    pub fn task_failed(task: &AgentTask, error: &str) -> Self {
        let mut signal = Self::new(SignalCategory::Task, "task_failed");
        signal.severity = Some(Severity::Error);
        signal.message = Some(error.to_string());
        signal.payload = Some(json!({ "task_id": task.id, "task_type": task.kind }));
        signal
    }

    pub fn log(severity: Severity, message: &str) -> Self {
        let mut signal = Self::new(SignalCategory::Log, "entry");
        signal.severity = Some(severity);
        signal.message = Some(message.to_string());
        signal
    }
}

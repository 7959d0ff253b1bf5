//! Runtime supervisor.
//!
//! [`AgentRuntime`] owns the whole agent lifecycle: the startup sequence,
//! configuration application and reconciliation, the heartbeat and dispatch
//! loops, and graceful shutdown of an unknown number of in-flight tasks.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         AgentRuntime                          │
//! │                                                               │
//! │  start ──► authenticate ► workspace config ► agent config     │
//! │                │                                              │
//! │                ▼                                              │
//! │        ┌──────────────┐   piggyback    ┌─────────────────┐    │
//! │        │ Heartbeat    │   config       │ TaskDispatcher  │    │
//! │        │ loop         │   ◄────────────│ (poll/claim/    │    │
//! │        └──────────────┘   apply_config │  execute)       │    │
//! │        ┌──────────────┐                └─────────────────┘    │
//! │        │ Worker       │  one per enabled scheduled worker     │
//! │        │ schedulers   │  kind, reconciled on config change    │
//! │        └──────────────┘                                       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! `apply_config` is serialized through the state mutex, so a second update
//! arriving while the first is still reconciling schedulers queues behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{
    AgentConfig, AuthError, ControlPlaneClient, Signal, WorkerKind, WorkspaceConfig,
};
use crate::config::ExternalCredentials;
use crate::logging;
use crate::transport::TransportError;

use super::dispatcher::TaskDispatcher;
use super::heartbeat;
use super::registry::HandlerRegistry;
use super::scheduler::WorkerScheduler;
use super::shared::RuntimeShared;

/// How long shutdown waits for in-flight tasks before abandoning them.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// Fatal startup failures. Any of these exits the process nonzero.
///
/// A failed *initial configuration* fetch is deliberately not here: the
/// agent starts on its environment defaults and picks the real
/// configuration up through piggyback delivery on the first poll.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("failed to load workspace configuration: {0}")]
    Workspace(TransportError),
}

/// Environment-derived settings that govern the runtime until the first
/// server-authored configuration arrives.
#[derive(Debug, Clone)]
pub struct InitialSettings {
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_concurrent_tasks: usize,
}

impl Default for InitialSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: crate::config::DEFAULT_POLL_INTERVAL_MS,
            heartbeat_interval_ms: crate::config::DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_concurrent_tasks: crate::config::DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl From<&crate::config::EnvConfig> for InitialSettings {
    fn from(env: &crate::config::EnvConfig) -> Self {
        Self {
            poll_interval_ms: env.poll_interval_ms,
            heartbeat_interval_ms: env.heartbeat_interval_ms,
            max_concurrent_tasks: env.max_concurrent_tasks,
        }
    }
}

impl InitialSettings {
    /// Stand-in configuration used when the initial fetch fails. The empty
    /// version string never matches a server version, so the first
    /// successful poll piggybacks the real configuration.
    fn fallback_config(&self) -> AgentConfig {
        AgentConfig {
            version: String::new(),
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            task_poll_interval_ms: self.poll_interval_ms,
            max_concurrent_tasks: self.max_concurrent_tasks,
            workers: HashMap::new(),
            limits: serde_json::Value::Null,
            version_info: None,
        }
    }
}

/// A cancellable background loop plus its join handle.
struct LoopHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RuntimeState {
    running: bool,
    workspace: Option<Arc<WorkspaceConfig>>,
    schedulers: HashMap<WorkerKind, WorkerScheduler>,
    heartbeat: Option<LoopHandle>,
    dispatcher: Option<LoopHandle>,
    dispatcher_poke: Option<Arc<Notify>>,
}

struct RuntimeInner {
    client: Arc<ControlPlaneClient>,
    registry: Arc<HandlerRegistry>,
    credentials: Arc<ExternalCredentials>,
    defaults: InitialSettings,
    shared: OnceLock<Arc<RuntimeShared>>,
    state: Mutex<RuntimeState>,
    stopped: AtomicBool,
}

/// The concurrency supervisor for one worker agent.
///
/// Cheap to clone; clones share the same runtime.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

impl AgentRuntime {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        registry: HandlerRegistry,
        credentials: ExternalCredentials,
        defaults: InitialSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                client,
                registry: Arc::new(registry),
                credentials: Arc::new(credentials),
                defaults,
                shared: OnceLock::new(),
                state: Mutex::new(RuntimeState::default()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Runs the startup sequence and spawns all background loops.
    ///
    /// Order: authenticate, load workspace config, load and apply the
    /// initial agent config, announce `agent_starting`, then start the
    /// heartbeat, the task poll loop, and one scheduler per enabled
    /// scheduled worker.
    pub async fn start(&self) -> Result<(), StartError> {
        let inner = &self.inner;

        if inner.shared.get().is_some() {
            warn!("Agent runtime already started");
            return Ok(());
        }

        info!(version = crate::VERSION, "Agent runtime starting");

        inner.client.authenticate().await?;
        info!("Control plane authentication succeeded");

        let workspace = inner
            .client
            .get_workspace_config()
            .await
            .map_err(StartError::Workspace)?;

        let config = match inner.client.get_config().await {
            Ok(config) => {
                info!(
                    config_version = %config.version,
                    max_concurrent_tasks = config.max_concurrent_tasks,
                    "Loaded agent configuration"
                );
                config
            }
            Err(err) => {
                warn!(
                    error = %err,
                    "Initial configuration fetch failed; running on environment defaults until the control plane supplies one"
                );
                inner.defaults.fallback_config()
            }
        };

        log_version_advisory(&config);
        apply_logger_level(&config);

        let shared = Arc::new(RuntimeShared::new(config.clone()));
        // First caller wins; the guard above makes a second set unreachable.
        let _ = inner.shared.set(Arc::clone(&shared));

        inner
            .client
            .send_signal(Signal::agent_starting(&config.version))
            .await;

        let mut state = inner.state.lock().await;
        let workspace = Arc::new(workspace);
        state.workspace = Some(Arc::clone(&workspace));

        // Heartbeat loop (first beat is immediate).
        let hb_token = CancellationToken::new();
        let hb_handle = heartbeat::spawn(
            Arc::clone(&shared),
            Arc::clone(&inner.client),
            hb_token.clone(),
        );
        state.heartbeat = Some(LoopHandle {
            token: hb_token,
            handle: hb_handle,
        });

        // Task dispatcher, with the piggyback-config channel feeding back
        // into apply_config.
        let (config_tx, mut config_rx) = mpsc::unbounded_channel::<AgentConfig>();
        let runtime = self.clone();
        tokio::spawn(async move {
            while let Some(new_config) = config_rx.recv().await {
                runtime.apply_config(new_config).await;
            }
        });

        let poke = Arc::new(Notify::new());
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&inner.client),
            Arc::clone(&inner.registry),
            Arc::clone(&shared),
            workspace,
            Arc::clone(&inner.credentials),
            config_tx,
            Arc::clone(&poke),
        );
        let dispatch_token = CancellationToken::new();
        let dispatch_handle = tokio::spawn(dispatcher.run(dispatch_token.clone()));
        state.dispatcher = Some(LoopHandle {
            token: dispatch_token,
            handle: dispatch_handle,
        });
        state.dispatcher_poke = Some(poke);

        // Worker schedulers.
        for (kind, interval_ms) in config.scheduled_workers() {
            state.schedulers.insert(
                kind,
                WorkerScheduler::start(
                    kind,
                    Duration::from_millis(interval_ms),
                    Arc::clone(&inner.client),
                ),
            );
        }

        state.running = true;
        info!("Agent runtime started");
        Ok(())
    }

    /// Applies a new configuration: swaps the shared snapshot, then
    /// reconciles intervals and worker schedulers. Re-applying the active
    /// configuration is a no-op with no stop/start cycle.
    pub async fn apply_config(&self, config: AgentConfig) {
        let inner = &self.inner;
        let Some(shared) = inner.shared.get() else {
            warn!("Ignoring configuration update before startup completed");
            return;
        };

        // The state lock serializes concurrent applies.
        let mut state = inner.state.lock().await;

        let old = shared.config_snapshot();
        if *old == config {
            debug!(version = %config.version, "Configuration unchanged; nothing to apply");
            return;
        }

        info!(
            old_version = %old.version,
            new_version = %config.version,
            "Applying configuration"
        );

        inner.client.versions().record(&config.version);
        shared.store_config(config.clone());
        log_version_advisory(&config);
        apply_logger_level(&config);

        if !state.running {
            return;
        }

        if old.heartbeat_interval_ms != config.heartbeat_interval_ms {
            info!(
                interval_ms = config.heartbeat_interval_ms,
                "Heartbeat interval changed; restarting heartbeat loop"
            );
            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.token.cancel();
            }
            let token = CancellationToken::new();
            let handle = heartbeat::spawn(
                Arc::clone(shared),
                Arc::clone(&inner.client),
                token.clone(),
            );
            state.heartbeat = Some(LoopHandle { token, handle });
        }

        if old.task_poll_interval_ms != config.task_poll_interval_ms {
            info!(
                interval_ms = config.task_poll_interval_ms,
                "Task poll interval changed; polling immediately"
            );
            if let Some(poke) = &state.dispatcher_poke {
                poke.notify_one();
            }
        }

        if old.max_concurrent_tasks != config.max_concurrent_tasks {
            // In-flight work is never cancelled; the new cap applies at the
            // next admission decision in the dispatcher.
            info!(
                max_concurrent_tasks = config.max_concurrent_tasks,
                "Concurrency cap updated"
            );
        }

        let current: HashMap<WorkerKind, u64> = state
            .schedulers
            .iter()
            .map(|(kind, scheduler)| (*kind, scheduler.interval().as_millis() as u64))
            .collect();
        for action in plan_scheduler_changes(&current, &config.scheduled_workers()) {
            match action {
                SchedulerAction::Start(kind, interval_ms) => {
                    state.schedulers.insert(
                        kind,
                        WorkerScheduler::start(
                            kind,
                            Duration::from_millis(interval_ms),
                            Arc::clone(&inner.client),
                        ),
                    );
                }
                SchedulerAction::Stop(kind) => {
                    if let Some(scheduler) = state.schedulers.remove(&kind) {
                        scheduler.stop();
                    }
                }
                SchedulerAction::Restart(kind, interval_ms) => {
                    if let Some(scheduler) = state.schedulers.remove(&kind) {
                        scheduler.stop();
                    }
                    state.schedulers.insert(
                        kind,
                        WorkerScheduler::start(
                            kind,
                            Duration::from_millis(interval_ms),
                            Arc::clone(&inner.client),
                        ),
                    );
                }
            }
        }
    }

    /// Graceful, idempotent shutdown: stop all timers, trip every in-flight
    /// cancellation token, wait up to [`SHUTDOWN_DRAIN`] for executions to
    /// finish, then announce `agent_stopping`.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Agent runtime stopping");

        let Some(shared) = inner.shared.get() else {
            return;
        };
        shared.begin_shutdown();

        let (heartbeat, dispatcher, schedulers) = {
            let mut state = inner.state.lock().await;
            state.running = false;
            (
                state.heartbeat.take(),
                state.dispatcher.take(),
                std::mem::take(&mut state.schedulers),
            )
        };

        if let Some(heartbeat) = &heartbeat {
            heartbeat.token.cancel();
        }
        if let Some(dispatcher) = &dispatcher {
            dispatcher.token.cancel();
        }
        for scheduler in schedulers.values() {
            scheduler.stop();
        }

        shared.in_flight.cancel_all();

        let drained = tokio::time::timeout(SHUTDOWN_DRAIN, shared.in_flight.drained())
            .await
            .is_ok();
        if !drained {
            warn!(
                abandoned = ?shared.in_flight.ids(),
                "Shutdown drain deadline elapsed with tasks still in flight"
            );
        }

        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.handle.await;
        }
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.handle.await;
        }

        let remaining = shared.in_flight.len();
        inner
            .client
            .send_signal(Signal::agent_stopping(remaining))
            .await;
        info!(in_flight = remaining, "Agent runtime stopped");
    }

    /// Number of task executions currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner
            .shared
            .get()
            .map(|shared| shared.in_flight.len())
            .unwrap_or(0)
    }

    /// Whether the runtime has started and not yet begun shutting down.
    pub fn is_running(&self) -> bool {
        self.inner.shared.get().is_some() && !self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Worker kinds with an active scheduler.
    pub async fn active_schedulers(&self) -> Vec<WorkerKind> {
        let state = self.inner.state.lock().await;
        let mut kinds: Vec<WorkerKind> = state.schedulers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

// =============================================================================
// Scheduler Reconciliation
// =============================================================================

/// One reconciliation step for a worker scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulerAction {
    Start(WorkerKind, u64),
    Stop(WorkerKind),
    Restart(WorkerKind, u64),
}

/// Diffs the running schedulers against the plan a configuration implies.
///
/// Rules: newly enabled workers start, disabled workers stop, an interval
/// change restarts with the new interval, and an unchanged worker is left
/// untouched (no stop/start cycle).
pub(crate) fn plan_scheduler_changes(
    current: &HashMap<WorkerKind, u64>,
    desired: &HashMap<WorkerKind, u64>,
) -> Vec<SchedulerAction> {
    let mut actions = Vec::new();
    for kind in WorkerKind::ALL {
        if !kind.is_scheduled() {
            continue;
        }
        match (current.get(&kind), desired.get(&kind)) {
            (None, Some(interval)) => actions.push(SchedulerAction::Start(kind, *interval)),
            (Some(_), None) => actions.push(SchedulerAction::Stop(kind)),
            (Some(running), Some(wanted)) if running != wanted => {
                actions.push(SchedulerAction::Restart(kind, *wanted));
            }
            _ => {}
        }
    }
    actions
}

// =============================================================================
// Config Side Effects
// =============================================================================

/// Logs the server's update advisory, if the configuration carries one.
fn log_version_advisory(config: &AgentConfig) {
    let Some(info) = &config.version_info else {
        return;
    };
    if info.recommended_version == crate::VERSION {
        return;
    }
    if info.required {
        warn!(
            current = crate::VERSION,
            recommended = %info.recommended_version,
            download_url = info.download_url.as_deref().unwrap_or(""),
            "Control plane requires a newer agent version"
        );
    } else {
        info!(
            current = crate::VERSION,
            recommended = %info.recommended_version,
            "A newer agent version is recommended"
        );
    }
}

/// Propagates `workers.logger.log_level` into the tracing filter.
fn apply_logger_level(config: &AgentConfig) {
    let Some(level) = config
        .worker(WorkerKind::Logger)
        .and_then(|settings| settings.extra_str("log_level"))
    else {
        return;
    };
    match level.parse() {
        Ok(level) => logging::set_level(level),
        Err(_) => warn!(log_level = level, "Ignoring unknown log level from configuration"),
    }
}

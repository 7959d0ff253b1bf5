//! Integration tests for the agent runtime.
//!
//! These drive a full [`AgentRuntime`] against a scripted in-memory control
//! plane: startup lifecycle, scheduler production, task claim/execute/report,
//! piggyback reconfiguration, poll backoff, the concurrency cap, and
//! graceful shutdown with cancellation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use adno_agent::api::{AgentTask, ConfigVersionStore, ControlPlaneClient};
use adno_agent::config::ExternalCredentials;
use adno_agent::runtime::{
    AgentRuntime, HandlerContext, HandlerError, HandlerRegistry, InitialSettings, TaskHandler,
};
use adno_agent::transport::{ApiRequest, ApiResponse, ApiTransport, Method, TransportError};

// =============================================================================
// Fake Control Plane
// =============================================================================

#[derive(Default)]
struct SimState {
    config: Value,
    workspace: Value,
    /// Scripted poll responses, consumed in order; empty means "no tasks".
    poll_responses: VecDeque<Value>,
    /// When set, every poll fails with this HTTP status.
    fail_polls_with: Option<u16>,
    poll_count: u32,
    /// Task ids whose claim is rejected (claimed by another agent).
    claim_rejects: HashSet<String>,
    /// Task bodies served on successful claims.
    claimable: HashMap<String, Value>,
    creates: Vec<Value>,
    claims: Vec<String>,
    completes: Vec<(String, Value)>,
    fails: Vec<(String, String, bool)>,
    signals: Vec<Value>,
}

/// Scripted control plane implementing the wire protocol in memory.
struct FakeControlPlane {
    state: Mutex<SimState>,
}

impl FakeControlPlane {
    fn new(config: Value) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState {
                config,
                workspace: json!({ "source": { "organization": "acme" } }),
                ..SimState::default()
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    fn queue_poll(&self, response: Value) {
        self.lock().poll_responses.push_back(response);
    }

    fn serve_task(&self, id: &str, kind: &str) {
        self.lock()
            .claimable
            .insert(id.to_string(), json!({ "id": id, "type": kind }));
    }

    fn reject_claim(&self, id: &str) {
        self.lock().claim_rejects.insert(id.to_string());
    }

    fn signal_kinds(&self) -> Vec<String> {
        self.lock()
            .signals
            .iter()
            .filter_map(|s| s["type"].as_str().map(str::to_string))
            .collect()
    }

    fn create_count(&self) -> usize {
        self.lock().creates.len()
    }

    fn poll_count(&self) -> u32 {
        self.lock().poll_count
    }
}

impl ApiTransport for FakeControlPlane {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + '_>> {
        let result = self.route(&request);
        Box::pin(async move { result.map(|body| ApiResponse { status: 200, body }) })
    }
}

impl FakeControlPlane {
    fn route(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let mut state = self.lock();
        let path = request.path.as_str();

        match (request.method, path) {
            (Method::Get, p) if p.starts_with("/api/agent/workspace-config") => {
                Ok(state.workspace.clone())
            }
            (Method::Get, p) if p.starts_with("/api/agent/config") => Ok(state.config.clone()),
            (Method::Get, p) if p.starts_with("/api/agent/tasks") => {
                state.poll_count += 1;
                if let Some(status) = state.fail_polls_with {
                    return Err(TransportError::Http {
                        status,
                        message: "unavailable".into(),
                    });
                }
                Ok(state
                    .poll_responses
                    .pop_front()
                    .unwrap_or_else(|| json!({ "tasks": [] })))
            }
            (Method::Post, p) if p.ends_with("/claim") => {
                let id = p
                    .trim_start_matches("/api/agent/tasks/")
                    .trim_end_matches("/claim")
                    .to_string();
                if state.claim_rejects.contains(&id) {
                    return Err(TransportError::Http {
                        status: 409,
                        message: "already claimed".into(),
                    });
                }
                state.claims.push(id.clone());
                let task = state
                    .claimable
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| json!({ "id": id, "type": "fetcher" }));
                Ok(task)
            }
            (Method::Post, p) if p.ends_with("/complete") => {
                let id = p
                    .trim_start_matches("/api/agent/tasks/")
                    .trim_end_matches("/complete")
                    .to_string();
                let result = request.body.clone().unwrap_or(Value::Null);
                state.completes.push((id, result["result"].clone()));
                Ok(Value::Null)
            }
            (Method::Post, p) if p.ends_with("/fail") => {
                let id = p
                    .trim_start_matches("/api/agent/tasks/")
                    .trim_end_matches("/fail")
                    .to_string();
                let body = request.body.clone().unwrap_or(Value::Null);
                state.fails.push((
                    id,
                    body["error"].as_str().unwrap_or("").to_string(),
                    body["retryable"].as_bool().unwrap_or(false),
                ));
                Ok(Value::Null)
            }
            (Method::Post, "/api/agent/tasks") => {
                let body = request.body.clone().unwrap_or(Value::Null);
                state.creates.push(body);
                let id = format!("sched-{}", state.creates.len());
                Ok(json!({ "task_id": id, "status": "pending" }))
            }
            (Method::Post, "/api/agent/signal") => {
                let body = request.body.clone().unwrap_or(Value::Null);
                if let Some(signals) = body["signals"].as_array() {
                    state.signals.extend(signals.iter().cloned());
                }
                Ok(Value::Null)
            }
            _ => Err(TransportError::Http {
                status: 404,
                message: format!("unexpected request: {} {}", request.method, path),
            }),
        }
    }
}

// =============================================================================
// Test Handlers
// =============================================================================

/// Handler that returns a fixed result immediately.
struct InstantHandler {
    result: Value,
}

impl TaskHandler for InstantHandler {
    fn execute<'a>(
        &'a self,
        _task: &'a AgentTask,
        _ctx: &'a HandlerContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>> {
        let result = self.result.clone();
        Box::pin(async move { Ok(result) })
    }
}

/// Handler that always fails.
struct FailingHandler;

impl TaskHandler for FailingHandler {
    fn execute<'a>(
        &'a self,
        _task: &'a AgentTask,
        _ctx: &'a HandlerContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>> {
        Box::pin(async move { Err(HandlerError::new("source system rejected the batch")) })
    }
}

/// Handler that sleeps, tracking observed concurrency.
struct SlowHandler {
    delay: Duration,
    current: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
}

impl SlowHandler {
    fn new(delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let max_seen = Arc::new(AtomicUsize::new(0));
        (
            Self {
                delay,
                current: Arc::new(AtomicUsize::new(0)),
                max_seen: Arc::clone(&max_seen),
            },
            max_seen,
        )
    }
}

impl TaskHandler for SlowHandler {
    fn execute<'a>(
        &'a self,
        _task: &'a AgentTask,
        _ctx: &'a HandlerContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({ "slept_ms": self.delay.as_millis() as u64 }))
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config_json(version: &str, poll_ms: u64, heartbeat_ms: u64, cap: usize, workers: Value) -> Value {
    json!({
        "version": version,
        "heartbeat_interval_ms": heartbeat_ms,
        "task_poll_interval_ms": poll_ms,
        "max_concurrent_tasks": cap,
        "workers": workers,
    })
}

fn runtime_with(plane: &Arc<FakeControlPlane>, registry: HandlerRegistry) -> AgentRuntime {
    let client = Arc::new(ControlPlaneClient::new(
        Arc::clone(plane) as Arc<dyn ApiTransport>,
        Arc::new(ConfigVersionStore::new()),
    ));
    AgentRuntime::new(
        client,
        registry,
        ExternalCredentials::default(),
        InitialSettings::default(),
    )
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn startup_announces_heartbeats_and_schedules() {
    let plane = FakeControlPlane::new(config_json(
        "v1",
        5_000,
        40,
        2,
        json!({ "fetcher": { "enabled": true, "schedule_interval_ms": 50 } }),
    ));
    let runtime = runtime_with(&plane, HandlerRegistry::new());

    runtime.start().await.unwrap();
    settle(140).await;

    let kinds = plane.signal_kinds();
    assert!(kinds.contains(&"agent_starting".to_string()));
    assert!(kinds.iter().filter(|k| *k == "heartbeat").count() >= 2);

    // Immediate creation on scheduler start plus at least one interval fire.
    assert!(plane.create_count() >= 2, "creates: {}", plane.create_count());
    {
        let state = plane.lock();
        assert_eq!(state.creates[0]["type"], "fetcher");
    }

    runtime.stop().await;
    let kinds = plane.signal_kinds();
    assert_eq!(kinds.last().map(String::as_str), Some("agent_stopping"));
}

#[tokio::test]
async fn claimed_task_is_executed_and_reported() {
    let plane = FakeControlPlane::new(config_json("v1", 40, 5_000, 2, json!({})));
    plane.serve_task("T1", "fetcher");
    plane.queue_poll(json!({ "tasks": [{ "id": "T1", "type": "fetcher" }] }));

    let registry = HandlerRegistry::new().register(
        adno_agent::api::WorkerKind::Fetcher,
        Arc::new(InstantHandler {
            result: json!({ "fetched": 3 }),
        }),
    );
    let runtime = runtime_with(&plane, registry);

    runtime.start().await.unwrap();
    settle(160).await;
    runtime.stop().await;

    {
        let state = plane.lock();
        assert_eq!(state.claims, vec!["T1".to_string()]);
        assert_eq!(state.completes.len(), 1);
        assert_eq!(state.completes[0].0, "T1");
        assert_eq!(state.completes[0].1, json!({ "fetched": 3 }));
        assert!(state.fails.is_empty());
    }

    let kinds = plane.signal_kinds();
    assert!(kinds.contains(&"task_started".to_string()));
    assert!(kinds.contains(&"task_completed".to_string()));
}

#[tokio::test]
async fn rejected_claim_produces_no_side_effects() {
    let plane = FakeControlPlane::new(config_json("v1", 40, 5_000, 2, json!({})));
    plane.reject_claim("T1");
    plane.queue_poll(json!({ "tasks": [{ "id": "T1", "type": "fetcher" }] }));

    let registry = HandlerRegistry::new().register(
        adno_agent::api::WorkerKind::Fetcher,
        Arc::new(InstantHandler { result: json!({}) }),
    );
    let runtime = runtime_with(&plane, registry);

    runtime.start().await.unwrap();
    settle(150).await;
    runtime.stop().await;

    let state = plane.lock();
    assert!(state.completes.is_empty());
    assert!(state.fails.is_empty());
    let task_signals: Vec<&Value> = state
        .signals
        .iter()
        .filter(|s| s["category"] == "task")
        .collect();
    assert!(task_signals.is_empty(), "unexpected: {:?}", task_signals);
}

#[tokio::test]
async fn handler_failure_is_reported_retryable() {
    let plane = FakeControlPlane::new(config_json("v1", 40, 5_000, 2, json!({})));
    plane.serve_task("T9", "apply");
    plane.queue_poll(json!({ "tasks": [{ "id": "T9", "type": "apply" }] }));

    let registry = HandlerRegistry::new().register(
        adno_agent::api::WorkerKind::Apply,
        Arc::new(FailingHandler),
    );
    let runtime = runtime_with(&plane, registry);

    runtime.start().await.unwrap();
    settle(150).await;
    runtime.stop().await;

    {
        let state = plane.lock();
        assert!(state.completes.is_empty());
        assert_eq!(state.fails.len(), 1);
        let (id, message, retryable) = &state.fails[0];
        assert_eq!(id, "T9");
        assert_eq!(message, "source system rejected the batch");
        assert!(*retryable);
    }
    assert!(plane.signal_kinds().contains(&"task_failed".to_string()));
}

#[tokio::test]
async fn piggyback_config_stops_disabled_scheduler() {
    let plane = FakeControlPlane::new(config_json(
        "v1",
        50,
        5_000,
        2,
        json!({ "fetcher": { "enabled": true, "schedule_interval_ms": 40 } }),
    ));
    // First poll carries zero tasks plus a config that disables the fetcher.
    plane.queue_poll(json!({
        "tasks": [],
        "config": config_json("v2", 60, 5_000, 2, json!({ "fetcher": { "enabled": false } })),
    }));

    let runtime = runtime_with(&plane, HandlerRegistry::new());
    runtime.start().await.unwrap();

    // Wait for the first poll (one interval in) and the apply to settle.
    settle(120).await;
    assert!(runtime.active_schedulers().await.is_empty());
    let creates_after_apply = plane.create_count();

    settle(200).await;
    assert_eq!(
        plane.create_count(),
        creates_after_apply,
        "fetcher scheduler fired after being disabled"
    );

    runtime.stop().await;
}

#[tokio::test]
async fn poll_failures_back_off_exponentially() {
    let plane = FakeControlPlane::new(config_json("v1", 40, 5_000, 2, json!({})));
    plane.lock().fail_polls_with = Some(503);

    let runtime = runtime_with(&plane, HandlerRegistry::new());
    runtime.start().await.unwrap();

    // With a 40 ms base and doubling on failure, polls land at roughly
    // t=40, 120, 280, 600... A fixed-interval loop would manage ~12 polls
    // in 500 ms; backoff must keep it well under that.
    settle(500).await;
    let failed_polls = plane.poll_count();
    assert!(failed_polls >= 2, "polls: {}", failed_polls);
    assert!(failed_polls <= 5, "backoff did not slow polling: {}", failed_polls);

    // Recovery restores the base interval.
    plane.lock().fail_polls_with = None;
    settle(400).await;
    let recovered_polls = plane.poll_count() - failed_polls;
    assert!(
        recovered_polls >= 3,
        "polling did not recover: {}",
        recovered_polls
    );

    runtime.stop().await;
}

#[tokio::test]
async fn concurrency_cap_of_one_serializes_handlers() {
    let plane = FakeControlPlane::new(config_json("v1", 30, 5_000, 1, json!({})));
    plane.serve_task("T1", "fetcher");
    plane.serve_task("T2", "fetcher");
    plane.queue_poll(json!({ "tasks": [{ "id": "T1", "type": "fetcher" }] }));
    plane.queue_poll(json!({ "tasks": [{ "id": "T2", "type": "fetcher" }] }));

    let (handler, max_seen) = SlowHandler::new(Duration::from_millis(100));
    let registry = HandlerRegistry::new()
        .register(adno_agent::api::WorkerKind::Fetcher, Arc::new(handler));
    let runtime = runtime_with(&plane, registry);

    runtime.start().await.unwrap();
    settle(500).await;
    runtime.stop().await;

    assert_eq!(plane.lock().completes.len(), 2);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1, "handlers overlapped");
}

#[tokio::test]
async fn shutdown_cancels_in_flight_tasks() {
    let plane = FakeControlPlane::new(config_json("v1", 30, 5_000, 3, json!({})));
    plane.serve_task("T1", "fetcher");
    plane.queue_poll(json!({ "tasks": [{ "id": "T1", "type": "fetcher" }] }));

    // Handler sleeps far longer than the test; only cancellation ends it.
    let (handler, _) = SlowHandler::new(Duration::from_secs(30));
    let registry = HandlerRegistry::new()
        .register(adno_agent::api::WorkerKind::Fetcher, Arc::new(handler));
    let runtime = runtime_with(&plane, registry);

    runtime.start().await.unwrap();
    settle(80).await;
    assert_eq!(runtime.in_flight(), 1);

    tokio::time::timeout(Duration::from_secs(5), runtime.stop())
        .await
        .expect("stop() must not wait for the sleeping handler");

    {
        let state = plane.lock();
        assert!(state.completes.is_empty());
        assert_eq!(state.fails.len(), 1);
        let (id, message, retryable) = &state.fails[0];
        assert_eq!(id, "T1");
        assert_eq!(message, "Task cancelled during shutdown");
        assert!(!*retryable);
    }

    let kinds = plane.signal_kinds();
    assert_eq!(kinds.last().map(String::as_str), Some("agent_stopping"));
}

#[tokio::test]
async fn stop_is_idempotent() {
    let plane = FakeControlPlane::new(config_json("v1", 5_000, 5_000, 2, json!({})));
    let runtime = runtime_with(&plane, HandlerRegistry::new());

    runtime.start().await.unwrap();
    runtime.stop().await;
    let signals_after_first = plane.signal_kinds().len();

    runtime.stop().await;
    assert_eq!(plane.signal_kinds().len(), signals_after_first);
}

#[tokio::test]
async fn reapplying_identical_config_is_a_noop() {
    let config = config_json(
        "v1",
        5_000,
        5_000,
        2,
        json!({ "maintain": { "enabled": true, "schedule_interval_ms": 60_000 } }),
    );
    let plane = FakeControlPlane::new(config.clone());
    let runtime = runtime_with(&plane, HandlerRegistry::new());

    runtime.start().await.unwrap();
    settle(30).await;
    let creates_before: usize = plane.create_count();

    let parsed: adno_agent::api::AgentConfig = serde_json::from_value(config).unwrap();
    runtime.apply_config(parsed).await;
    settle(60).await;

    // A restart would have fired the scheduler's immediate create again.
    assert_eq!(plane.create_count(), creates_before);
    assert_eq!(
        runtime.active_schedulers().await,
        vec![adno_agent::api::WorkerKind::Maintain]
    );

    runtime.stop().await;
}

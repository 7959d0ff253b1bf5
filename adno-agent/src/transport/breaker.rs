//! Three-state circuit breaker.
//!
//! [`CircuitBreaker`] wraps an inner transport and fails fast once the
//! upstream looks persistently broken:
//!
//! ```text
//!            failure_count >= failure_threshold
//!   CLOSED ────────────────────────────────────► OPEN
//!     ▲                                           │ first call after
//!     │ success_threshold                         │ recovery_timeout
//!     │ consecutive successes                     ▼
//!     └────────────────────────────────────── HALF_OPEN
//!                       any counted failure ──────► OPEN
//! ```
//!
//! Only upstream sickness moves the breaker: status >= 500, timeouts, and
//! no-status transport failures. 4xx responses prove the server is alive and
//! are treated as successes for state purposes, so a misconfigured path can
//! never silence an otherwise healthy runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use super::error::TransportError;
use super::http::{ApiRequest, ApiResponse, ApiTransport};

/// Consecutive counted failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Consecutive successes in half-open before the breaker closes.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// How long an open breaker waits before admitting a probe call.
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 60;

/// Per-call deadline imposed by the breaker itself, guarding against a
/// misconfigured inner timeout.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
}

/// Transport wrapper that fails fast while the upstream is broken.
pub struct CircuitBreaker<T> {
    inner: T,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    call_timeout: Duration,
    // All state mutation is confined to execute(); the lock is held only for
    // counter updates, never across the inner call.
    state: Mutex<BreakerInner>,
}

impl<T: ApiTransport> CircuitBreaker<T> {
    /// Wraps `inner` with the default thresholds and timeouts.
    pub fn new(inner: T) -> Self {
        Self::with_settings(
            inner,
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_SUCCESS_THRESHOLD,
            Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        )
    }

    /// Wraps `inner` with custom thresholds and timeouts.
    pub fn with_settings(
        inner: T,
        failure_threshold: u32,
        success_threshold: u32,
        recovery_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            recovery_timeout,
            call_timeout,
            state: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt_at: None,
            }),
        }
    }

    /// Current state, for observability and tests.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Gate check before touching the network. Returns the remaining wait
    /// when the breaker is open and not yet due for a probe.
    fn admit(&self) -> Result<(), Duration> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let now = Instant::now();
                match inner.next_attempt_at {
                    Some(at) if now < at => Err(at - now),
                    _ => {
                        inner.state = BreakerState::HalfOpen;
                        inner.success_count = 0;
                        info!("Circuit breaker half-open; admitting probe call");
                        Ok(())
                    }
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.next_attempt_at = None;
                    info!("Circuit breaker closed; upstream recovered");
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.next_attempt_at = Some(Instant::now() + self.recovery_timeout);
                    warn!(
                        failures = inner.failure_count,
                        recovery_secs = self.recovery_timeout.as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.failure_count = self.failure_threshold;
                inner.success_count = 0;
                inner.next_attempt_at = Some(Instant::now() + self.recovery_timeout);
                warn!(
                    recovery_secs = self.recovery_timeout.as_secs(),
                    "Circuit breaker reopened; probe call failed"
                );
            }
            BreakerState::Open => {}
        }
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        if let Err(retry_after) = self.admit() {
            return Err(TransportError::CircuitOpen { retry_after });
        }

        let result = match tokio::time::timeout(self.call_timeout, self.inner.send(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        match &result {
            Ok(_) => self.on_success(),
            Err(err) if err.counts_toward_breaker() => self.on_failure(),
            // 4xx: the upstream answered, so the dependency is healthy.
            Err(_) => self.on_success(),
        }

        result
    }
}

impl<T: ApiTransport> ApiTransport for CircuitBreaker<T> {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}

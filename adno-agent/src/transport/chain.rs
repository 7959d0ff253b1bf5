//! Transport chain assembly.
//!
//! Composes the resilience stack in its normative order — circuit breaker
//! outside retry outside the HTTP core — and caps it with a logging
//! decorator. The application layer owns contextual logging for 4xx
//! responses; the decorator only reports failures that indicate a broken
//! upstream or transport.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use super::breaker::{
    CircuitBreaker, DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RECOVERY_TIMEOUT_SECS, DEFAULT_SUCCESS_THRESHOLD,
};
use super::error::TransportError;
use super::http::{ApiRequest, ApiResponse, ApiTransport, HttpTransport, DEFAULT_REQUEST_TIMEOUT_SECS};
use super::retry::{RetryPolicy, DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS};

// =============================================================================
// Logging Decorator
// =============================================================================

/// Outermost decorator that logs upstream-side failures at error level.
///
/// 4xx failures stay silent here, and breaker-open rejections are already
/// logged once per state transition by the breaker itself.
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T: ApiTransport> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    async fn send_logged(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = request.method;
        let path = request.path.clone();

        let result = self.inner.send(request).await;

        if let Err(err) = &result {
            let upstream_broken = match err {
                TransportError::CircuitOpen { .. } => false,
                TransportError::Http { status, .. } => *status >= 500,
                _ => true,
            };
            if upstream_broken {
                error!(method = %method, path = %path, error = %err, "Control plane request failed");
            }
        }

        result
    }
}

impl<T: ApiTransport> ApiTransport for LoggingTransport<T> {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + '_>> {
        Box::pin(self.send_logged(request))
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Tuning knobs for the composed transport chain.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Per-request deadline for the HTTP core.
    pub request_timeout: Duration,
    /// Attempt budget for the retry policy.
    pub max_attempts: u32,
    /// Base delay between retry attempts.
    pub retry_backoff: Duration,
    /// Consecutive counted failures before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open before the breaker closes.
    pub success_threshold: u32,
    /// Wait before an open breaker admits a probe call.
    pub recovery_timeout: Duration,
    /// Per-call deadline imposed by the breaker.
    pub call_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            recovery_timeout: Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

/// Builds the full request-issuing chain consumed by the control-plane
/// client: Logging(CircuitBreaker(RetryPolicy(HttpTransport))).
pub fn build_transport(
    base_url: impl Into<String>,
    api_key: impl Into<String>,
    options: TransportOptions,
) -> Result<Arc<dyn ApiTransport>, TransportError> {
    let core = HttpTransport::with_timeout(base_url, api_key, options.request_timeout)?;
    let retried = RetryPolicy::with_policy(core, options.max_attempts, options.retry_backoff);
    let guarded = CircuitBreaker::with_settings(
        retried,
        options.failure_threshold,
        options.success_threshold,
        options.recovery_timeout,
        options.call_timeout,
    );
    Ok(Arc::new(LoggingTransport::new(guarded)))
}

//! Bounded exponential-backoff retry.
//!
//! [`RetryPolicy`] wraps an inner transport and re-issues transient failures
//! up to a fixed attempt budget. Deterministic client errors (4xx other than
//! 429) propagate immediately.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use super::error::TransportError;
use super::http::{ApiRequest, ApiResponse, ApiTransport};

/// Default number of attempts per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between attempts; doubles after each failure.
pub const DEFAULT_BACKOFF_MS: u64 = 500;

/// Transport wrapper that retries transient failures.
pub struct RetryPolicy<T> {
    inner: T,
    max_attempts: u32,
    backoff: Duration,
}

impl<T: ApiTransport> RetryPolicy<T> {
    /// Wraps `inner` with the default attempt budget and backoff.
    pub fn new(inner: T) -> Self {
        Self::with_policy(
            inner,
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_BACKOFF_MS),
        )
    }

    /// Wraps `inner` with a custom attempt budget and base backoff.
    pub fn with_policy(inner: T, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    async fn send_with_retries(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut attempt = 1;
        loop {
            match self.inner.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    // backoff_ms * 2^(attempt-1)
                    let delay = self.backoff.saturating_mul(1u32 << (attempt - 1).min(16));
                    debug!(
                        path = %request.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T: ApiTransport> ApiTransport for RetryPolicy<T> {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + '_>> {
        Box::pin(self.send_with_retries(request))
    }
}

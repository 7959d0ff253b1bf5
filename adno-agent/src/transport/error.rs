//! Transport error taxonomy.
//!
//! Every failure mode of the HTTP stack is collapsed into [`TransportError`]
//! so the retry policy and circuit breaker can classify failures without
//! knowing which layer produced them.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the control-plane transport stack.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request did not complete within the configured deadline.
    #[error("request timed out")]
    Timeout,

    /// The circuit breaker refused the call without touching the network.
    #[error("circuit breaker open; next attempt allowed in {}s", retry_after.as_secs())]
    CircuitOpen {
        /// Time remaining until the breaker admits a probe call.
        retry_after: Duration,
    },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded into the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the retry policy should attempt this request again.
    ///
    /// Client errors in [400, 500) other than 429 are deterministic; retrying
    /// them wastes budget and may violate idempotence.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http { status, .. } => {
                !(400..500).contains(status) || *status == 429
            }
            TransportError::CircuitOpen { .. } => false,
            _ => true,
        }
    }

    /// Whether this failure counts toward opening the circuit breaker.
    ///
    /// Only signals of a sick upstream count: 5xx, timeouts, and failures
    /// with no status at all. A stream of 4xx responses indicates a client
    /// fault and must not silence an otherwise healthy runtime.
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            TransportError::Http { status, .. } => *status >= 500,
            TransportError::Timeout => true,
            TransportError::Network(_) => true,
            TransportError::Decode(_) => true,
            TransportError::CircuitOpen { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> TransportError {
        TransportError::Http {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!http(400).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!http(422).is_retryable());
    }

    #[test]
    fn rate_limit_is_retryable() {
        assert!(http(429).is_retryable());
    }

    #[test]
    fn server_errors_and_transport_failures_are_retryable() {
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Network("reset".into()).is_retryable());
    }

    #[test]
    fn breaker_counts_only_upstream_sickness() {
        assert!(http(500).counts_toward_breaker());
        assert!(TransportError::Timeout.counts_toward_breaker());
        assert!(TransportError::Network("refused".into()).counts_toward_breaker());
        assert!(!http(404).counts_toward_breaker());
        assert!(!http(429).counts_toward_breaker());
        assert!(
            !TransportError::CircuitOpen {
                retry_after: Duration::from_secs(1)
            }
            .counts_toward_breaker()
        );
    }
}

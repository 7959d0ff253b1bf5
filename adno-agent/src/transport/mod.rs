//! Resilient HTTP transport for the control plane.
//!
//! The transport is a chain of wrappers around one reqwest core:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ LoggingTransport          error-level log for 5xx/network  │
//! │ └─ CircuitBreaker         fail fast when upstream is sick  │
//! │    └─ RetryPolicy         bounded exponential backoff      │
//! │       └─ HttpTransport    deadline, auth, JSON, problem     │
//! │                           document extraction              │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Use [`build_transport`] to assemble the chain; everything above consumes
//! it as `Arc<dyn ApiTransport>`.

mod breaker;
mod chain;
mod error;
mod http;
mod retry;

pub use breaker::{
    BreakerState, CircuitBreaker, DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RECOVERY_TIMEOUT_SECS, DEFAULT_SUCCESS_THRESHOLD,
};
pub use chain::{build_transport, LoggingTransport, TransportOptions};
pub use error::TransportError;
pub use http::{
    ApiRequest, ApiResponse, ApiTransport, HttpTransport, Method, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use retry::{RetryPolicy, DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS};

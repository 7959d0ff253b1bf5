//! HTTP transport core.
//!
//! [`HttpTransport`] issues a single HTTPS request against the control-plane
//! base URL with the bearer credential injected, a per-request deadline, and
//! structured error translation. The [`ApiTransport`] trait abstracts the
//! wire so resilience wrappers compose around it and tests can substitute
//! scripted implementations instead of a live server.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::error::TransportError;
use crate::VERSION;

/// Default deadline for a full request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Media type of RFC 9457 problem documents.
const PROBLEM_JSON: &str = "application/problem+json";

// =============================================================================
// Request / Response
// =============================================================================

/// HTTP method subset used by the control-plane protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// One outbound control-plane request.
///
/// Cloneable so the retry policy can re-issue it verbatim.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, including any query string.
    pub path: String,
    /// JSON body for POST requests.
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// A decoded 2xx response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Value::Null` when the body was empty.
    pub body: Value,
}

impl ApiResponse {
    /// Deserializes the body into a caller-chosen type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Trait for issuing one control-plane request.
///
/// Dyn-compatible so the composed resilience chain can be held as
/// `Arc<dyn ApiTransport>` by the client and handler contexts.
pub trait ApiTransport: Send + Sync {
    /// Sends the request and returns the decoded response or a structured
    /// error. Implementations must never surface the bearer credential in
    /// error messages or logs.
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + '_>>;
}

// =============================================================================
// Reqwest Implementation
// =============================================================================

/// Production transport backed by a pooled `reqwest::Client`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    /// Creates a transport with the default 30 s request deadline.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(
            base_url,
            api_key,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Creates a transport with a custom request deadline.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("adno-agent/{}", VERSION))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        builder = builder.bearer_auth(&self.api_key);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                // reqwest error strings carry the URL, never the credential.
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        debug!(
            method = %request.method,
            path = %request.path,
            status,
            "Control plane response"
        );

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let text = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(format!("failed to read response body: {}", e))
            }
        })?;
        let text = String::from_utf8_lossy(&text).into_owned();

        if !(200..300).contains(&status) {
            return Err(TransportError::Http {
                status,
                message: error_message(&content_type, &text),
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?
        };

        Ok(ApiResponse { status, body })
    }
}

impl ApiTransport for HttpTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + '_>> {
        Box::pin(self.dispatch(request))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // api_key is deliberately omitted.
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Error Message Extraction
// =============================================================================

/// Builds a human-readable message from an error response body.
///
/// RFC 9457 problem documents contribute their `title`/`detail`/`status`
/// fields; other JSON bodies are pretty-printed; anything else passes
/// through verbatim.
pub(crate) fn error_message(content_type: &str, body: &str) -> String {
    if content_type.starts_with(PROBLEM_JSON) {
        if let Ok(problem) = serde_json::from_str::<Value>(body) {
            return problem_message(&problem);
        }
    }

    match serde_json::from_str::<Value>(body) {
        Ok(json) => serde_json::to_string_pretty(&json).unwrap_or_else(|_| body.to_string()),
        Err(_) => body.to_string(),
    }
}

/// Renders the `title`/`detail`/`status` triple of a problem document.
fn problem_message(problem: &Value) -> String {
    let title = problem.get("title").and_then(Value::as_str);
    let detail = problem.get("detail").and_then(Value::as_str);
    let status = problem.get("status").and_then(Value::as_u64);

    let mut parts = Vec::new();
    if let Some(title) = title {
        parts.push(title.to_string());
    }
    if let Some(detail) = detail {
        parts.push(detail.to_string());
    }
    if let Some(status) = status {
        parts.push(format!("(status {})", status));
    }

    if parts.is_empty() {
        problem.to_string()
    } else {
        parts.join(": ")
    }
}

//! Logging bootstrap.
//!
//! Structured logs go to stdout in JSON or text per `LOG_FORMAT`; the host
//! owns any file management. The active filter honors `RUST_LOG` when set
//! and can be retargeted at runtime when the control plane pushes a new
//! logger level.

use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::{LogFormat, LogLevel};

static RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Failure to install the global subscriber (usually a second init).
#[derive(Debug, Error)]
#[error("failed to initialize logging: {0}")]
pub struct InitError(String);

/// Installs the global tracing subscriber.
pub fn init(level: LogLevel, format: LogFormat) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter_layer);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_ansi(false))
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .map_err(|e| InitError(e.to_string()))?;

    let _ = RELOAD_HANDLE.set(handle);
    Ok(())
}

/// Retargets the log filter, e.g. when a configuration update changes the
/// logger worker's level. A no-op before [`init`].
pub fn set_level(level: LogLevel) {
    let Some(handle) = RELOAD_HANDLE.get() else {
        return;
    };
    match handle.reload(EnvFilter::new(level.as_str())) {
        Ok(()) => tracing::info!(level = %level, "Log level updated"),
        Err(e) => tracing::warn!(error = %e, "Failed to update log level"),
    }
}

//! Adno worker agent runtime.
//!
//! A long-running, single-host agent that authenticates against a remote
//! control plane, receives its operating configuration dynamically, creates
//! recurring work through per-worker schedulers, and executes individually
//! claimed tasks with bounded concurrency and cooperative cancellation.
//!
//! # High-Level API
//!
//! ```ignore
//! use adno_agent::api::{ConfigVersionStore, ControlPlaneClient};
//! use adno_agent::config::EnvConfig;
//! use adno_agent::runtime::{AgentRuntime, HandlerRegistry, InitialSettings};
//! use adno_agent::transport::{build_transport, TransportOptions};
//! use std::sync::Arc;
//!
//! let env = EnvConfig::from_env()?;
//! let transport = build_transport(&env.api_url, &env.api_key, TransportOptions::default())?;
//! let client = Arc::new(ControlPlaneClient::new(transport, Arc::new(ConfigVersionStore::new())));
//!
//! let runtime = AgentRuntime::new(
//!     client,
//!     HandlerRegistry::new(),
//!     env.credentials.clone(),
//!     InitialSettings::from(&env),
//! );
//! runtime.start().await?;
//! // ... wait for SIGTERM/SIGINT ...
//! runtime.stop().await;
//! ```

pub mod api;
pub mod config;
pub mod logging;
pub mod runtime;
pub mod system;
pub mod transport;

/// Version of the agent library and CLI.
///
/// Synchronized across the workspace; injected from `Cargo.toml` at compile
/// time and reported to the control plane in lifecycle signals.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Adno worker agent CLI.
//!
//! `adno-agent run` starts the long-running agent process and stops it
//! gracefully on SIGTERM/SIGINT; `adno-agent check` validates the
//! environment configuration without contacting the control plane.

mod error;
mod handlers;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use adno_agent::api::{ConfigVersionStore, ControlPlaneClient};
use adno_agent::config::EnvConfig;
use adno_agent::logging;
use adno_agent::runtime::{AgentRuntime, InitialSettings};
use adno_agent::transport::{build_transport, TransportOptions};

use error::CliError;

#[derive(Parser)]
#[command(name = "adno-agent")]
#[command(version = adno_agent::VERSION)]
#[command(about = "Adno worker agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until SIGTERM or Ctrl-C
    Run,

    /// Validate environment configuration and print the resolved settings
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run => run().await,
        Commands::Check => check(),
    };
    if let Err(e) = result {
        e.exit();
    }
}

async fn run() -> Result<(), CliError> {
    // Validation failures go to stderr before logging exists.
    let env = EnvConfig::from_env().map_err(CliError::Env)?;

    logging::init(env.log_level, env.log_format).map_err(|e| CliError::Logging(e.to_string()))?;

    let transport = build_transport(&env.api_url, &env.api_key, TransportOptions::default())
        .map_err(|e| CliError::Transport(e.to_string()))?;
    let client = Arc::new(ControlPlaneClient::new(
        transport,
        Arc::new(ConfigVersionStore::new()),
    ));

    let runtime = AgentRuntime::new(
        client,
        handlers::default_registry(),
        env.credentials.clone(),
        InitialSettings::from(&env),
    );

    runtime.start().await.map_err(CliError::Startup)?;

    wait_for_shutdown_signal().await;

    runtime.stop().await;
    Ok(())
}

fn check() -> Result<(), CliError> {
    let env = EnvConfig::from_env().map_err(CliError::Env)?;

    println!("Configuration OK");
    println!("  api_url:                {}", env.api_url);
    println!("  api_key:                {}", env.redacted_api_key());
    println!("  poll_interval_ms:       {}", env.poll_interval_ms);
    println!("  heartbeat_interval_ms:  {}", env.heartbeat_interval_ms);
    println!("  max_concurrent_tasks:   {}", env.max_concurrent_tasks);
    println!("  log_level:              {}", env.log_level);
    println!(
        "  source credentials:     {}",
        if env.credentials.source_token.is_some() {
            "configured"
        } else {
            "not set"
        }
    );
    println!(
        "  ai credentials:         {}",
        if env.credentials.ai_api_key.is_some() {
            "configured"
        } else {
            "not set"
        }
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler; relying on Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl-C");
}

//! CLI error handling with user-friendly messages.
//!
//! Centralizes error formatting and exit codes: every startup-path failure
//! exits 1, graceful shutdown exits 0.

use std::fmt;
use std::process;

use adno_agent::api::AuthError;
use adno_agent::config::EnvVarError;
use adno_agent::runtime::StartError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Environment validation failed; carries every failed variable.
    Env(Vec<EnvVarError>),
    /// Failed to initialize logging.
    Logging(String),
    /// Failed to build the HTTP transport chain.
    Transport(String),
    /// The runtime's startup sequence failed.
    Startup(StartError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code 1.
    pub fn exit(&self) -> ! {
        match self {
            CliError::Env(errors) => {
                eprintln!("Error: invalid environment configuration:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            other => eprintln!("Error: {}", other),
        }

        if let CliError::Startup(StartError::Auth(auth)) = self {
            eprintln!();
            match auth {
                AuthError::InvalidCredential => {
                    eprintln!("Check that ADNO_API_KEY matches the key issued for this agent.");
                }
                AuthError::Forbidden => {
                    eprintln!(
                        "The key authenticated but lacks agent permissions; \
                         verify the key's role in the control plane."
                    );
                }
                AuthError::Infra(_) => {
                    eprintln!("Check ADNO_API_URL and that the control plane is reachable.");
                }
            }
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Env(errors) => {
                write!(f, "invalid environment configuration ({} problems)", errors.len())
            }
            CliError::Logging(msg) => write!(f, "failed to initialize logging: {}", msg),
            CliError::Transport(msg) => write!(f, "failed to build HTTP transport: {}", msg),
            CliError::Startup(e) => write!(f, "startup failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Startup(e) => Some(e),
            _ => None,
        }
    }
}

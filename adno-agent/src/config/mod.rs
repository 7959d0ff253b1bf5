//! Process configuration from environment variables.
//!
//! Read once at startup. Required variables that fail validation abort the
//! process before any network call; optional variables fall back to their
//! documented defaults. Validation reports *all* problems at once instead of
//! stopping at the first.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// =============================================================================
// Variable Names and Bounds
// =============================================================================

pub const ENV_API_KEY: &str = "ADNO_API_KEY";
pub const ENV_API_URL: &str = "ADNO_API_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "POLL_INTERVAL_MS";
pub const ENV_HEARTBEAT_INTERVAL_MS: &str = "HEARTBEAT_INTERVAL_MS";
pub const ENV_MAX_CONCURRENT_TASKS: &str = "MAX_CONCURRENT_TASKS";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 5_000..=300_000;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 60_000;
pub const HEARTBEAT_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 10_000..=600_000;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;
pub const MAX_CONCURRENT_TASKS_RANGE: std::ops::RangeInclusive<usize> = 1..=10;

/// Length of the hex portion of a valid API key (`agnt_` + 32 hex chars).
const API_KEY_HEX_LEN: usize = 32;

// =============================================================================
// Log Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(()),
        }
    }
}

// =============================================================================
// External Credentials
// =============================================================================

/// Optional credentials for the external systems handlers integrate with.
/// Opaque to the runtime; forwarded through the handler context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalCredentials {
    pub source_organization: Option<String>,
    pub source_project: Option<String>,
    pub source_token: Option<String>,
    pub ai_endpoint: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_deployment: Option<String>,
}

// =============================================================================
// Environment Configuration
// =============================================================================

/// One failed environment validation.
#[derive(Debug, Clone, Error)]
#[error("{variable}: {reason}")]
pub struct EnvVarError {
    pub variable: &'static str,
    pub reason: String,
}

impl EnvVarError {
    fn new(variable: &'static str, reason: impl Into<String>) -> Self {
        Self {
            variable,
            reason: reason.into(),
        }
    }
}

/// Validated startup configuration.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub api_key: String,
    pub api_url: String,
    /// Initial task-poll interval, used until the first server config.
    pub poll_interval_ms: u64,
    /// Initial heartbeat interval, used until the first server config.
    pub heartbeat_interval_ms: u64,
    pub max_concurrent_tasks: usize,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub credentials: ExternalCredentials,
}

impl EnvConfig {
    /// Loads and validates configuration from the process environment.
    pub fn from_env() -> Result<Self, Vec<EnvVarError>> {
        Self::load_from(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an injectable lookup, collecting every
    /// validation failure.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Vec<EnvVarError>> {
        let mut errors = Vec::new();

        let api_key = match lookup(ENV_API_KEY) {
            Some(key) if is_valid_api_key(&key) => key,
            Some(_) => {
                errors.push(EnvVarError::new(
                    ENV_API_KEY,
                    format!(
                        "must match 'agnt_' followed by {} lowercase hex characters",
                        API_KEY_HEX_LEN
                    ),
                ));
                String::new()
            }
            None => {
                errors.push(EnvVarError::new(ENV_API_KEY, "is required"));
                String::new()
            }
        };

        let api_url = match lookup(ENV_API_URL) {
            Some(url) if url.starts_with("https://") => url.trim_end_matches('/').to_string(),
            Some(_) => {
                errors.push(EnvVarError::new(ENV_API_URL, "must be an https:// URL"));
                String::new()
            }
            None => {
                errors.push(EnvVarError::new(ENV_API_URL, "is required"));
                String::new()
            }
        };

        let poll_interval_ms = bounded_u64(
            &lookup,
            ENV_POLL_INTERVAL_MS,
            DEFAULT_POLL_INTERVAL_MS,
            POLL_INTERVAL_RANGE_MS,
            &mut errors,
        );
        let heartbeat_interval_ms = bounded_u64(
            &lookup,
            ENV_HEARTBEAT_INTERVAL_MS,
            DEFAULT_HEARTBEAT_INTERVAL_MS,
            HEARTBEAT_INTERVAL_RANGE_MS,
            &mut errors,
        );
        let max_concurrent_tasks = bounded_usize(
            &lookup,
            ENV_MAX_CONCURRENT_TASKS,
            DEFAULT_MAX_CONCURRENT_TASKS,
            MAX_CONCURRENT_TASKS_RANGE,
            &mut errors,
        );

        let log_level = parse_enum(&lookup, ENV_LOG_LEVEL, LogLevel::Info, &mut errors);
        let log_format = parse_enum(&lookup, ENV_LOG_FORMAT, LogFormat::Json, &mut errors);

        let credentials = ExternalCredentials {
            source_organization: lookup("SOURCE_SYSTEM_ORGANIZATION"),
            source_project: lookup("SOURCE_SYSTEM_PROJECT"),
            source_token: lookup("SOURCE_SYSTEM_TOKEN"),
            ai_endpoint: lookup("AI_ENDPOINT"),
            ai_api_key: lookup("AI_API_KEY"),
            ai_deployment: lookup("AI_DEPLOYMENT"),
        };

        if errors.is_empty() {
            Ok(Self {
                api_key,
                api_url,
                poll_interval_ms,
                heartbeat_interval_ms,
                max_concurrent_tasks,
                log_level,
                log_format,
                credentials,
            })
        } else {
            Err(errors)
        }
    }

    /// The API key with its secret portion masked, for display.
    pub fn redacted_api_key(&self) -> String {
        if self.api_key.len() > 9 {
            format!("{}****{}", &self.api_key[..5], &self.api_key[self.api_key.len() - 4..])
        } else {
            "****".to_string()
        }
    }
}

/// Local validation of the bearer credential shape:
/// `agnt_` followed by exactly 32 lowercase hex characters.
pub fn is_valid_api_key(key: &str) -> bool {
    match key.strip_prefix("agnt_") {
        Some(hex) => {
            hex.len() == API_KEY_HEX_LEN
                && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        }
        None => false,
    }
}

fn bounded_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    variable: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
    errors: &mut Vec<EnvVarError>,
) -> u64 {
    let Some(raw) = lookup(variable) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(value) if range.contains(&value) => value,
        Ok(value) => {
            errors.push(EnvVarError::new(
                variable,
                format!(
                    "{} is outside the allowed range {}..={}",
                    value,
                    range.start(),
                    range.end()
                ),
            ));
            default
        }
        Err(_) => {
            errors.push(EnvVarError::new(
                variable,
                format!("'{}' is not a valid integer", raw),
            ));
            default
        }
    }
}

fn bounded_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    variable: &'static str,
    default: usize,
    range: std::ops::RangeInclusive<usize>,
    errors: &mut Vec<EnvVarError>,
) -> usize {
    bounded_u64(
        lookup,
        variable,
        default as u64,
        *range.start() as u64..=*range.end() as u64,
        errors,
    ) as usize
}

fn parse_enum<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    variable: &'static str,
    default: T,
    errors: &mut Vec<EnvVarError>,
) -> T {
    let Some(raw) = lookup(variable) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            errors.push(EnvVarError::new(
                variable,
                format!("'{}' is not a recognized value", raw),
            ));
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const VALID_KEY: &str = "agnt_0123456789abcdef0123456789abcdef";

    #[test]
    fn minimal_valid_environment() {
        let config = EnvConfig::load_from(env(&[
            (ENV_API_KEY, VALID_KEY),
            (ENV_API_URL, "https://cp.example.com/"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://cp.example.com");
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert_eq!(config.max_concurrent_tasks, DEFAULT_MAX_CONCURRENT_TASKS);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn wrong_length_api_key_is_rejected() {
        let errors = EnvConfig::load_from(env(&[
            (ENV_API_KEY, "agnt_xxxx"),
            (ENV_API_URL, "https://cp.example.com"),
        ]))
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].variable, ENV_API_KEY);
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        assert!(!is_valid_api_key(
            "agnt_0123456789ABCDEF0123456789ABCDEF"
        ));
        assert!(is_valid_api_key(VALID_KEY));
        assert!(!is_valid_api_key("token_0123456789abcdef0123456789abcdef"));
    }

    #[test]
    fn missing_required_variables_are_both_reported() {
        let errors = EnvConfig::load_from(env(&[])).unwrap_err();
        let variables: Vec<&str> = errors.iter().map(|e| e.variable).collect();
        assert!(variables.contains(&ENV_API_KEY));
        assert!(variables.contains(&ENV_API_URL));
    }

    #[test]
    fn http_url_is_rejected() {
        let errors = EnvConfig::load_from(env(&[
            (ENV_API_KEY, VALID_KEY),
            (ENV_API_URL, "http://cp.example.com"),
        ]))
        .unwrap_err();
        assert_eq!(errors[0].variable, ENV_API_URL);
    }

    #[test]
    fn out_of_range_interval_is_rejected() {
        let errors = EnvConfig::load_from(env(&[
            (ENV_API_KEY, VALID_KEY),
            (ENV_API_URL, "https://cp.example.com"),
            (ENV_POLL_INTERVAL_MS, "1000"),
        ]))
        .unwrap_err();
        assert_eq!(errors[0].variable, ENV_POLL_INTERVAL_MS);
    }

    #[test]
    fn bounds_are_inclusive() {
        let config = EnvConfig::load_from(env(&[
            (ENV_API_KEY, VALID_KEY),
            (ENV_API_URL, "https://cp.example.com"),
            (ENV_POLL_INTERVAL_MS, "5000"),
            (ENV_HEARTBEAT_INTERVAL_MS, "600000"),
            (ENV_MAX_CONCURRENT_TASKS, "10"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.heartbeat_interval_ms, 600_000);
        assert_eq!(config.max_concurrent_tasks, 10);
    }

    #[test]
    fn log_settings_parse_case_insensitively() {
        let config = EnvConfig::load_from(env(&[
            (ENV_API_KEY, VALID_KEY),
            (ENV_API_URL, "https://cp.example.com"),
            (ENV_LOG_LEVEL, "DEBUG"),
            (ENV_LOG_FORMAT, "text"),
        ]))
        .unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn external_credentials_pass_through() {
        let config = EnvConfig::load_from(env(&[
            (ENV_API_KEY, VALID_KEY),
            (ENV_API_URL, "https://cp.example.com"),
            ("SOURCE_SYSTEM_ORGANIZATION", "acme"),
            ("AI_ENDPOINT", "https://ai.example.com"),
        ]))
        .unwrap();
        assert_eq!(config.credentials.source_organization.as_deref(), Some("acme"));
        assert_eq!(config.credentials.ai_endpoint.as_deref(), Some("https://ai.example.com"));
        assert!(config.credentials.source_token.is_none());
    }

    #[test]
    fn redacted_key_hides_secret_portion() {
        let config = EnvConfig::load_from(env(&[
            (ENV_API_KEY, VALID_KEY),
            (ENV_API_URL, "https://cp.example.com"),
        ]))
        .unwrap();
        let redacted = config.redacted_api_key();
        assert!(redacted.starts_with("agnt_"));
        assert!(redacted.ends_with("cdef"));
        assert!(!redacted.contains("0123456789abcdef0123456789abcdef"));
    }
}

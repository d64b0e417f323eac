//! Configuration loader for the intake sync components
//!
//! All configuration is read from environment variables with the `INTAKE_`
//! prefix, optionally seeded from a `.env` file via dotenvy.
//!
//! # Example
//!
//! ```no_run
//! use intake_core::config::{load_dotenv, ConfigLoader, RelayConfig, SessionConfig};
//!
//! # fn example() -> Result<(), intake_core::IntakeError> {
//! load_dotenv();
//!
//! let relay = RelayConfig::from_env()?;
//! let session = SessionConfig::from_env()?;
//!
//! relay.validate()?;
//! session.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::IntakeError;
use std::time::Duration;
use url::Url;

/// Default relay topic shared by the editor and its viewers
pub const DEFAULT_TOPIC: &str = "patient-form";

/// Configuration loader trait
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a set variable cannot be parsed.
    fn from_env() -> Result<Self, IntakeError>;

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if any validation check fails.
    fn validate(&self) -> Result<(), IntakeError>;
}

/// Relay transport configuration
///
/// # Environment Variables
///
/// - `INTAKE_RELAY_AUTH_URL` (optional): Token endpoint (default: `http://localhost:3000/api/ably-token`)
/// - `INTAKE_RELAY_REST_URL` (optional): REST API base (default: `https://rest.ably.io`)
/// - `INTAKE_RELAY_REALTIME_URL` (optional): Realtime/SSE base (default: `https://realtime.ably.io`)
/// - `INTAKE_RELAY_TOPIC` (optional): Channel name (default: `patient-form`)
/// - `INTAKE_RELAY_REQUEST_TIMEOUT` (optional): HTTP request timeout in seconds (default: 10)
/// - `INTAKE_RELAY_RECONNECT_DELAY_MS` (optional): Delay before reopening a dropped stream (default: 2000)
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub auth_url: String,
    pub rest_url: String,
    pub realtime_url: String,
    pub topic: String,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://localhost:3000/api/ably-token".to_string(),
            rest_url: "https://rest.ably.io".to_string(),
            realtime_url: "https://realtime.ably.io".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(2000),
        }
    }
}

impl ConfigLoader for RelayConfig {
    fn from_env() -> Result<Self, IntakeError> {
        let defaults = RelayConfig::default();

        let auth_url = env_or("INTAKE_RELAY_AUTH_URL", defaults.auth_url);
        let rest_url = env_or("INTAKE_RELAY_REST_URL", defaults.rest_url);
        let realtime_url = env_or("INTAKE_RELAY_REALTIME_URL", defaults.realtime_url);
        let topic = env_or("INTAKE_RELAY_TOPIC", defaults.topic);

        let request_timeout_secs = parse_env_var("INTAKE_RELAY_REQUEST_TIMEOUT", 10u64)?;
        let reconnect_delay_ms = parse_env_var("INTAKE_RELAY_RECONNECT_DELAY_MS", 2000u64)?;

        Ok(Self {
            auth_url,
            rest_url,
            realtime_url,
            topic,
            request_timeout: Duration::from_secs(request_timeout_secs),
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
        })
    }

    fn validate(&self) -> Result<(), IntakeError> {
        validate_http_url(&self.auth_url, "INTAKE_RELAY_AUTH_URL")?;
        validate_http_url(&self.rest_url, "INTAKE_RELAY_REST_URL")?;
        validate_http_url(&self.realtime_url, "INTAKE_RELAY_REALTIME_URL")?;

        if self.topic.trim().is_empty() {
            return Err(IntakeError::configuration(
                "topic must not be empty",
                "INTAKE_RELAY_TOPIC",
            ));
        }

        if self.request_timeout.as_secs() == 0 {
            return Err(IntakeError::configuration(
                "request_timeout must be greater than 0 seconds",
                "INTAKE_RELAY_REQUEST_TIMEOUT",
            ));
        }

        Ok(())
    }
}

/// Session timing configuration
///
/// # Environment Variables
///
/// - `INTAKE_SESSION_IDLE_DEBOUNCE_MS` (optional): Quiet period before `idle` is sent (default: 1000)
/// - `INTAKE_SESSION_EVENT_BUFFER` (optional): Viewer change-event buffer size (default: 64)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_debounce: Duration,
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_debounce: Duration::from_millis(1000),
            event_buffer: 64,
        }
    }
}

impl ConfigLoader for SessionConfig {
    fn from_env() -> Result<Self, IntakeError> {
        let idle_debounce_ms = parse_env_var("INTAKE_SESSION_IDLE_DEBOUNCE_MS", 1000u64)?;
        let event_buffer = parse_env_var(
            "INTAKE_SESSION_EVENT_BUFFER",
            SessionConfig::default().event_buffer,
        )?;

        Ok(Self {
            idle_debounce: Duration::from_millis(idle_debounce_ms),
            event_buffer,
        })
    }

    fn validate(&self) -> Result<(), IntakeError> {
        if self.idle_debounce.is_zero() {
            return Err(IntakeError::configuration(
                "idle_debounce must be greater than 0 milliseconds",
                "INTAKE_SESSION_IDLE_DEBOUNCE_MS",
            ));
        }

        if self.event_buffer == 0 {
            return Err(IntakeError::configuration(
                "event_buffer must be greater than 0",
                "INTAKE_SESSION_EVENT_BUFFER",
            ));
        }

        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn validate_http_url(value: &str, key: &str) -> Result<(), IntakeError> {
    let url = Url::parse(value)
        .map_err(|e| IntakeError::configuration(format!("Invalid URL '{}': {}", value, e), key))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(IntakeError::configuration(
            format!("Unsupported URL scheme '{}' (expected http or https)", scheme),
            key,
        )),
    }
}

/// Parse an environment variable, returning `default` when it is unset
///
/// # Errors
///
/// Returns a `ConfigurationError` if the value cannot be parsed
pub fn parse_env_var<T>(key: &str, default: T) -> Result<T, IntakeError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| IntakeError::configuration(format!("Failed to parse {}: {}", key, e), key))
        })
        .unwrap_or(Ok(default))
}

/// Load .env file if present
///
/// A missing .env file is not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to set environment variable for test
    fn set_test_env(key: &str, value: &str) {
        env::set_var(key, value);
    }

    /// Helper to remove environment variable after test
    fn clear_test_env(key: &str) {
        env::remove_var(key);
    }

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.topic, "patient-form");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relay_config_from_env() {
        set_test_env("INTAKE_RELAY_AUTH_URL", "https://intake.example.com/api/ably-token");
        set_test_env("INTAKE_RELAY_TOPIC", "ward-7-intake");

        let config = RelayConfig::from_env().unwrap();
        assert_eq!(config.auth_url, "https://intake.example.com/api/ably-token");
        assert_eq!(config.topic, "ward-7-intake");

        clear_test_env("INTAKE_RELAY_AUTH_URL");
        clear_test_env("INTAKE_RELAY_TOPIC");
    }

    #[test]
    fn test_relay_config_validation_invalid_url() {
        let config = RelayConfig {
            rest_url: "not-a-valid-url".to_string(),
            ..RelayConfig::default()
        };

        let result = config.validate();
        assert!(matches!(
            result.unwrap_err(),
            IntakeError::ConfigurationError { .. }
        ));
    }

    #[test]
    fn test_relay_config_validation_rejects_non_http_scheme() {
        let config = RelayConfig {
            realtime_url: "wss://realtime.ably.io".to_string(),
            ..RelayConfig::default()
        };

        match config.validate().unwrap_err() {
            IntakeError::ConfigurationError { message, key } => {
                assert!(message.contains("Unsupported URL scheme"));
                assert_eq!(key.as_deref(), Some("INTAKE_RELAY_REALTIME_URL"));
            }
            other => panic!("Expected ConfigurationError, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_config_validation_empty_topic() {
        let config = RelayConfig {
            topic: "  ".to_string(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_debounce, Duration::from_millis(1000));
        assert_eq!(config.event_buffer, 64);
    }

    #[test]
    fn test_session_config_validation_zero_debounce() {
        let config = SessionConfig {
            idle_debounce: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_var_with_default() {
        let result: u32 = parse_env_var("INTAKE_NON_EXISTENT_VAR", 42).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_parse_env_var_invalid_value() {
        set_test_env("INTAKE_TEST_INVALID_VAR", "not-a-number");
        let result: Result<u32, _> = parse_env_var("INTAKE_TEST_INVALID_VAR", 42);
        assert!(result.is_err());
        clear_test_env("INTAKE_TEST_INVALID_VAR");
    }
}

//! Dispatcher configuration.

use std::time::Duration;
use thiserror::Error;
use trellis_core::{Properties, PropertyValue};

/// Property key enabling the implicit default group.
pub const DEFAULT_ENABLED: &str = "trellis.default.enabled";
/// Property key for the implicit default group's path.
pub const DEFAULT_PATH: &str = "trellis.default.path";
/// Property key for the shutdown timeout in milliseconds.
pub const SHUTDOWN_TIMEOUT_MS: &str = "trellis.shutdown.timeout.ms";

/// A configuration value could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value `{value}` for `{key}`: expected {expected}")]
pub struct ConfigError {
    /// Offending key.
    pub key: &'static str,
    /// Offending value, rendered.
    pub value: String,
    /// What the key accepts.
    pub expected: &'static str,
}

/// Settings for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Whether a built-in default group exists when no explicit one does.
    pub implicit_default: bool,
    /// Path of the built-in default group.
    pub default_path: String,
    /// How long [`close`](crate::Dispatcher::close) waits for a running pass.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            implicit_default: true,
            default_path: "/".to_owned(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl DispatcherConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the implicit default group.
    pub fn with_implicit_default(mut self, enabled: bool) -> Self {
        self.implicit_default = enabled;
        self
    }

    /// Set the implicit default group's path.
    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = path.into();
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Read settings from a property map, falling back to defaults for
    /// missing keys.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = props.get(DEFAULT_ENABLED) {
            config.implicit_default = match value {
                PropertyValue::Bool(b) => *b,
                PropertyValue::Str(s) if s.eq_ignore_ascii_case("true") => true,
                PropertyValue::Str(s) if s.eq_ignore_ascii_case("false") => false,
                other => return Err(invalid(DEFAULT_ENABLED, other, "a boolean")),
            };
        }

        if let Some(value) = props.get(DEFAULT_PATH) {
            config.default_path = value
                .as_str()
                .ok_or_else(|| invalid(DEFAULT_PATH, value, "a string"))?
                .to_owned();
        }

        if let Some(value) = props.get(SHUTDOWN_TIMEOUT_MS) {
            let millis = value
                .as_int()
                .and_then(|ms| u64::try_from(ms).ok())
                .ok_or_else(|| invalid(SHUTDOWN_TIMEOUT_MS, value, "a non-negative integer"))?;
            config.shutdown_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &PropertyValue, expected: &'static str) -> ConfigError {
    ConfigError {
        key,
        value: value.to_string(),
        expected,
    }
}

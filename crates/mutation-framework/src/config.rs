//! # Configuration
//!
//! Runtime knobs loaded from environment variables with development-friendly
//! defaults.

use crate::lock::{check_timeout_minutes, DEFAULT_LOCK_TIMEOUT_MINUTES};
use chrono::Duration;

/// Default capacity of the store actor's request channel.
pub const DEFAULT_STORE_BUFFER: usize = 32;

/// Errors raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got {value:?}")]
    Unparsable {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("lock timeout must be between 1 and 240 minutes, got {0}")]
    LockTimeoutOutOfRange(i64),
    #[error("store buffer size must be positive")]
    EmptyStoreBuffer,
}

/// Framework configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkConfig {
    /// Timeout given to locks on newly created entities.
    pub lock_timeout_minutes: i64,
    /// Capacity of the store actor's request channel.
    pub store_buffer_size: usize,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            lock_timeout_minutes: DEFAULT_LOCK_TIMEOUT_MINUTES,
            store_buffer_size: DEFAULT_STORE_BUFFER,
        }
    }
}

impl FrameworkConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `MUTATION_LOCK_TIMEOUT_MINUTES`  | `15`    |
    /// | `MUTATION_STORE_BUFFER`          | `32`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_timeout_minutes = match std::env::var("MUTATION_LOCK_TIMEOUT_MINUTES") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Unparsable {
                var: "MUTATION_LOCK_TIMEOUT_MINUTES",
                expected: "i64",
                value: raw,
            })?,
            Err(_) => defaults.lock_timeout_minutes,
        };

        let store_buffer_size = match std::env::var("MUTATION_STORE_BUFFER") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Unparsable {
                var: "MUTATION_STORE_BUFFER",
                expected: "usize",
                value: raw,
            })?,
            Err(_) => defaults.store_buffer_size,
        };

        let config = Self {
            lock_timeout_minutes,
            store_buffer_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_lock_timeout(self.lock_timeout_minutes)?;
        if self.store_buffer_size == 0 {
            return Err(ConfigError::EmptyStoreBuffer);
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::minutes(self.lock_timeout_minutes)
    }
}

/// Validate a lock timeout in minutes.
pub fn validate_lock_timeout(minutes: i64) -> Result<(), ConfigError> {
    check_timeout_minutes(minutes)
        .map(|_| ())
        .map_err(|_| ConfigError::LockTimeoutOutOfRange(minutes))
}

//! Configuration types for the ledger.
//!
//! This module contains all configuration structures used by the ledger,
//! including transition settings, storage backend selection, retention and
//! logging.

use crate::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a [`TaskLedger`](crate::core::TaskLedger).
///
/// # Examples
///
/// ```rust
/// use taskledger::config::*;
///
/// // Use default configuration
/// let config = LedgerConfig::default();
///
/// // Custom configuration
/// let config = LedgerConfig {
///     tracker: TrackerSettings {
///         retry_history_cap: 5,
///         ..Default::default()
///     },
///     retention: RetentionConfig::every(60).keep_for(86_400),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Lifecycle tracker settings
    pub tracker: TrackerSettings,

    /// Record store configuration
    pub store: StoreConfig,

    /// Retention sweep configuration
    pub retention: RetentionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Settings that shape lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Maximum retry-history entries kept per task; oldest are dropped first
    pub retry_history_cap: usize,

    /// How many times a transition is re-read and re-applied after losing a
    /// compare-and-set race before giving up
    pub max_update_attempts: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            retry_history_cap: 20,
            max_update_attempts: 16,
        }
    }
}

impl TrackerSettings {
    /// Set the retry history cap.
    pub fn with_retry_history_cap(mut self, cap: usize) -> Self {
        self.retry_history_cap = cap;
        self
    }

    /// Set the maximum number of update attempts.
    pub fn with_max_update_attempts(mut self, attempts: u32) -> Self {
        self.max_update_attempts = attempts;
        self
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend-specific configuration
    pub backend: StoreBackendConfig,
}

impl StoreConfig {
    /// Create configuration for the in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackendConfig::InMemory,
        }
    }

    /// Create configuration for the Redis store.
    #[cfg(feature = "redis-store")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
    pub fn redis(connection_string: impl Into<String>) -> Self {
        Self {
            backend: StoreBackendConfig::Redis(RedisConfig {
                connection_string: connection_string.into(),
                ..Default::default()
            }),
        }
    }
}

/// Store backend-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum StoreBackendConfig {
    /// In-memory store (default)
    #[default]
    InMemory,

    /// Redis store configuration
    #[cfg(feature = "redis-store")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
    Redis(RedisConfig),
}

/// Redis store configuration.
#[cfg(feature = "redis-store")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    pub connection_string: String,

    /// Key prefix for Redis keys
    pub key_prefix: String,

    /// Timeout for establishing the connection (in seconds)
    pub connect_timeout_secs: u64,
}

#[cfg(feature = "redis-store")]
impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "taskledger".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Retention sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Run the background sweeper at all
    pub enable_auto_cleanup: bool,

    /// Terminal records older than this are removed (in seconds)
    pub cleanup_age_threshold_secs: u64,

    /// Interval between sweeps (in seconds)
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enable_auto_cleanup: false,
            cleanup_age_threshold_secs: 7 * 24 * 3600, // 7 days
            cleanup_interval_secs: 3600,               // 1 hour
        }
    }
}

impl RetentionConfig {
    /// Enable sweeping every `interval_secs` seconds.
    pub fn every(interval_secs: u64) -> Self {
        Self {
            enable_auto_cleanup: true,
            cleanup_interval_secs: interval_secs,
            ..Default::default()
        }
    }

    /// Set the age threshold.
    pub fn keep_for(mut self, age_secs: u64) -> Self {
        self.cleanup_age_threshold_secs = age_secs;
        self
    }

    /// Age threshold as a [`Duration`]
    pub fn max_age(&self) -> Duration {
        self.cleanup_age_threshold_secs.secs()
    }

    /// Sweep interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        self.cleanup_interval_secs.secs()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, overridden by `RUST_LOG` when set
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Enable colored output (ignored if json_format is true)
    pub colored: bool,

    /// Include timestamps in logs
    pub include_timestamps: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            colored: true,
            include_timestamps: true,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }
}

impl LedgerConfig {
    /// Create a new configuration suited to local development.
    pub fn development() -> Self {
        Self {
            tracker: TrackerSettings::default(),
            store: StoreConfig::in_memory(),
            retention: RetentionConfig::every(60).keep_for(3600),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: true,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Create a new configuration suited to production.
    pub fn production() -> Self {
        Self {
            tracker: TrackerSettings {
                retry_history_cap: 50,
                max_update_attempts: 32,
            },
            store: StoreConfig::default(),
            retention: RetentionConfig::every(3600).keep_for(7 * 24 * 3600),
            logging: LoggingConfig {
                level: LogLevel::Info,
                json_format: true,
                colored: false,
                include_timestamps: true,
                include_targets: false,
            },
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            tracker: TrackerSettings {
                retry_history_cap: 3,
                max_update_attempts: 64,
            },
            store: StoreConfig::in_memory(),
            retention: RetentionConfig::default(),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_timestamps: false,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Load a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> LedgerResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config
            .validate()
            .map_err(|errors| LedgerError::config(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.tracker.retry_history_cap == 0 {
            errors.push("Retry history cap must be greater than 0".to_string());
        }

        if self.tracker.max_update_attempts == 0 {
            errors.push("Max update attempts must be greater than 0".to_string());
        }

        if self.retention.enable_auto_cleanup && self.retention.cleanup_interval_secs == 0 {
            errors.push("Cleanup interval must be greater than 0".to_string());
        }

        #[cfg(feature = "redis-store")]
        self.validate_redis(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[cfg(feature = "redis-store")]
    fn validate_redis(&self, errors: &mut Vec<String>) {
        if let StoreBackendConfig::Redis(redis) = &self.store.backend {
            if redis.connection_string.is_empty() {
                errors.push("Redis connection string must not be empty".to_string());
            }
            if redis.key_prefix.is_empty() {
                errors.push("Redis key prefix must not be empty".to_string());
            }
        }
    }
}

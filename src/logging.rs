//! Console logging setup driven by [`LoggingConfig`].
//!
//! The ledger itself only emits `tracing` events; applications that do not
//! install their own subscriber can call [`init`] once at startup.

use crate::config::LoggingConfig;
use crate::error::{LedgerError, LedgerResult};
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let level: tracing::Level = config.level.into();
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install a global fmt subscriber.
///
/// Fails with [`LedgerError::Config`] if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> LedgerResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(config.include_targets);

    let result = match (config.json_format, config.include_timestamps) {
        (true, true) => builder.json().try_init(),
        (true, false) => builder.json().without_time().try_init(),
        (false, true) => builder.with_ansi(config.colored).try_init(),
        (false, false) => builder.with_ansi(config.colored).without_time().try_init(),
    };

    result.map_err(|e| LedgerError::config(format!("Failed to install subscriber: {e}")))?;

    tracing::debug!(
        level = ?config.level,
        json = config.json_format,
        "Logging initialized"
    );
    Ok(())
}

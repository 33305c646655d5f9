//! Structured logging.
//!
//! One `tracing-subscriber` fmt subscriber per process, filtered by an
//! [`EnvFilter`] built from [`TelemetryConfig::log_level`]. With JSON enabled
//! each line carries:
//! - `timestamp`: ISO 8601 timestamp
//! - `level`: Log level (trace, debug, info, warn, error)
//! - `target`: Module that logged (`event_bus::bus`, `event_bus::handler`, ...)
//! - `threadName`: Dispatcher worker (`eventbus-loop-0`, `eventbus-pool-2`, ...)
//! - `fields`: Structured fields such as `key`, `handler`, `sequence`

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::EnvFilter;

/// Build the log filter for `config`.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("invalid log filter '{}': {e}", config.log_level)))
}

/// Install the global subscriber.
///
/// Fails if the filter does not parse or a global subscriber is already set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(config.thread_names);

    let installed = if config.json_logs {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        json_logs = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

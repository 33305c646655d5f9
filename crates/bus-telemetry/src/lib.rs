//! # Bus Telemetry
//!
//! Logging and metrics for processes that embed the event bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` fmt output, plain or JSON, filtered by `EnvFilter`
//! - **Metrics**: a Prometheus [`MetricsSink`](event_bus::MetricsSink) for the bus
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//! use event_bus::EventBus;
//!
//! fn main() -> anyhow::Result<()> {
//!     let telemetry = init_telemetry(&TelemetryConfig::from_env())?;
//!     let bus = EventBus::builder().metrics(telemetry.metrics()).build()?;
//!
//!     // Scrape `bus_telemetry::encode_metrics()` from your HTTP endpoint.
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `EVENTBUS_SERVICE_NAME` | `eventbus` | Service name in logs |
//! | `EVENTBUS_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `EVENTBUS_JSON_LOGS` | `false` | JSON log lines (default on in containers) |
//! | `EVENTBUS_THREAD_NAMES` | `true` | Include worker thread names |
//! | `EVENTBUS_METRICS_NAMESPACE` | `eventbus` | Prometheus name prefix |

#![warn(missing_docs)]

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};
pub use metrics::{
    encode_metrics, encode_registry, register_metrics, PrometheusMetrics, REGISTRY,
};

use event_bus::SharedMetrics;
use std::sync::Arc;
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// The global log subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// A metric family could not be created or registered.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register the bus metrics globally.
///
/// Call once per process; the returned handle supplies the metrics sink for
/// every bus the process builds.
///
/// # Example
///
/// ```rust,ignore
/// let telemetry = init_telemetry(&TelemetryConfig::from_env())?;
/// let bus = EventBus::builder().metrics(telemetry.metrics()).build()?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Telemetry, TelemetryError> {
    init_logging(config)?;
    let metrics = register_metrics(&config.metrics_namespace)?;

    Ok(Telemetry {
        metrics: Arc::new(metrics),
    })
}

/// Handle to the process-wide telemetry.
#[derive(Debug, Clone)]
pub struct Telemetry {
    metrics: Arc<PrometheusMetrics>,
}

impl Telemetry {
    /// Sink to pass to `EventBusBuilder::metrics`.
    #[must_use]
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Current metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        encode_metrics()
    }
}

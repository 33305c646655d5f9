//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to log lines
    pub service_name: String,

    /// Log filter directive (`info`, `event_bus=debug,warn`, ...)
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Whether to include worker thread names in log lines
    pub thread_names: bool,

    /// Prefix of every Prometheus metric name
    pub metrics_namespace: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "eventbus".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            thread_names: true,
            metrics_namespace: "eventbus".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVENTBUS_SERVICE_NAME`: Service name (default: eventbus)
    /// - `EVENTBUS_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `EVENTBUS_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `EVENTBUS_THREAD_NAMES`: Log worker thread names (default: true)
    /// - `EVENTBUS_METRICS_NAMESPACE`: Metric name prefix (default: eventbus)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();
        let defaults = Self::default();

        Self {
            service_name: lookup("EVENTBUS_SERVICE_NAME").unwrap_or(defaults.service_name),

            log_level: lookup("EVENTBUS_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            json_logs: lookup("EVENTBUS_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(is_container),

            thread_names: lookup("EVENTBUS_THREAD_NAMES")
                .map(|v| !v.eq_ignore_ascii_case("false") && v != "0")
                .unwrap_or(defaults.thread_names),

            metrics_namespace: lookup("EVENTBUS_METRICS_NAMESPACE")
                .unwrap_or(defaults.metrics_namespace),
        }
    }

    /// Configuration for a named service, otherwise from the environment.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = service_name.to_string();
        config
    }
}

//! Prometheus metrics for the event bus.
//!
//! [`PrometheusMetrics`] implements the bus's [`MetricsSink`] contract. Dotted
//! bus metric names map to `<namespace>_<metric>_<unit>` families:
//!
//! | Bus metric | Prometheus family | Labels |
//! |------------|-------------------|--------|
//! | `eventbus.emitted` | `<ns>_events_emitted_total` | `key` |
//! | `eventbus.dropped` | `<ns>_events_dropped_total` | `key` |
//! | `eventbus.evicted` | `<ns>_events_evicted_total` | `key` |
//! | `eventbus.unhandled` | `<ns>_events_unhandled_total` | `key` |
//! | `eventbus.delivered` | `<ns>_events_delivered_total` | `key` |
//! | `eventbus.handler.failures` | `<ns>_handler_failures_total` | `key`, `handler` |
//! | `eventbus.handler.duration` | `<ns>_handler_duration_seconds` | `key`, `handler` |

use event_bus::metrics::{
    Tags, DELIVERED, DROPPED, EMITTED, EVICTED, HANDLER_DURATION, HANDLER_FAILURES, UNHANDLED,
};
use event_bus::MetricsSink;
use lazy_static::lazy_static;
use prometheus::{exponential_buckets, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use tracing::trace;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();
}

const KEY_LABELS: &[&str] = &["key"];
const HANDLER_LABELS: &[&str] = &["key", "handler"];

/// Prometheus-backed metrics sink.
#[derive(Clone)]
pub struct PrometheusMetrics {
    emitted: CounterVec,
    dropped: CounterVec,
    evicted: CounterVec,
    unhandled: CounterVec,
    delivered: CounterVec,
    handler_failures: CounterVec,
    handler_duration: HistogramVec,
}

impl PrometheusMetrics {
    /// Create every family under `namespace` and register it with `registry`.
    pub fn register(registry: &Registry, namespace: &str) -> Result<Self, TelemetryError> {
        let counter = |name: &str, help: &str, labels: &[&str]| {
            let vec = CounterVec::new(Opts::new(name, help).namespace(namespace), labels)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            registry
                .register(Box::new(vec.clone()))
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            Ok::<_, TelemetryError>(vec)
        };

        let emitted = counter("events_emitted_total", "Events accepted by emit", KEY_LABELS)?;
        let dropped = counter(
            "events_dropped_total",
            "Events discarded by full DROP channels",
            KEY_LABELS,
        )?;
        let evicted = counter(
            "events_evicted_total",
            "Queued events evicted by LATEST channels",
            KEY_LABELS,
        )?;
        let unhandled = counter(
            "events_unhandled_total",
            "Events emitted with no subscriber",
            KEY_LABELS,
        )?;
        let delivered = counter(
            "events_delivered_total",
            "Events delivered to a subscription",
            KEY_LABELS,
        )?;
        let handler_failures = counter(
            "handler_failures_total",
            "Handler invocations that failed or panicked",
            HANDLER_LABELS,
        )?;

        let buckets = exponential_buckets(0.000_001, 4.0, 12)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        let handler_duration = HistogramVec::new(
            HistogramOpts::new("handler_duration_seconds", "Time spent in handler bodies")
                .namespace(namespace)
                .buckets(buckets),
            HANDLER_LABELS,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        registry
            .register(Box::new(handler_duration.clone()))
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

        Ok(Self {
            emitted,
            dropped,
            evicted,
            unhandled,
            delivered,
            handler_failures,
            handler_duration,
        })
    }

    fn counter_for(&self, name: &str) -> Option<(&CounterVec, &'static [&'static str])> {
        let found = match name {
            EMITTED => (&self.emitted, KEY_LABELS),
            DROPPED => (&self.dropped, KEY_LABELS),
            EVICTED => (&self.evicted, KEY_LABELS),
            UNHANDLED => (&self.unhandled, KEY_LABELS),
            DELIVERED => (&self.delivered, KEY_LABELS),
            HANDLER_FAILURES => (&self.handler_failures, HANDLER_LABELS),
            _ => return None,
        };
        Some(found)
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

/// Label values in the order of `labels`; missing tags become empty strings.
fn label_values<'a>(labels: &[&str], tags: Tags<'a>) -> Vec<&'a str> {
    labels
        .iter()
        .map(|label| {
            tags.iter()
                .find(|(name, _)| name == label)
                .map_or("", |(_, value)| *value)
        })
        .collect()
}

impl MetricsSink for PrometheusMetrics {
    fn counter_increment(&self, name: &str, tags: Tags<'_>) {
        match self.counter_for(name) {
            Some((counter, labels)) => counter.with_label_values(&label_values(labels, tags)).inc(),
            None => trace!(metric = name, "Unmapped counter ignored"),
        }
    }

    fn timer_record(&self, name: &str, tags: Tags<'_>, duration_nanos: u64) {
        if name != HANDLER_DURATION {
            trace!(metric = name, "Unmapped timer ignored");
            return;
        }
        // Precision loss above 2^53 ns is irrelevant for handler timings.
        #[allow(clippy::cast_precision_loss)]
        let seconds = duration_nanos as f64 / 1e9;
        self.handler_duration
            .with_label_values(&label_values(HANDLER_LABELS, tags))
            .observe(seconds);
    }
}

/// Register the bus families with the global registry.
pub fn register_metrics(namespace: &str) -> Result<PrometheusMetrics, TelemetryError> {
    PrometheusMetrics::register(&REGISTRY, namespace)
}

/// Encode a registry as Prometheus text format.
pub fn encode_registry(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Encode all metrics in the global registry.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    encode_registry(&REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (Registry, PrometheusMetrics) {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::register(&registry, "test").expect("register");
        (registry, metrics)
    }

    #[test]
    fn test_counters_map_to_families() {
        let (_registry, metrics) = sink();
        metrics.counter_increment(EMITTED, &[("key", "a")]);
        metrics.counter_increment(EMITTED, &[("key", "a")]);
        metrics.counter_increment(DROPPED, &[("key", "b")]);

        assert_eq!(metrics.emitted.with_label_values(&["a"]).get(), 2.0);
        assert_eq!(metrics.dropped.with_label_values(&["b"]).get(), 1.0);
    }

    #[test]
    fn test_handler_labels_follow_declared_order() {
        let (_registry, metrics) = sink();
        metrics.counter_increment(HANDLER_FAILURES, &[("handler", "h"), ("key", "k")]);
        assert_eq!(
            metrics.handler_failures.with_label_values(&["k", "h"]).get(),
            1.0
        );
    }

    #[test]
    fn test_timer_records_seconds() {
        let (_registry, metrics) = sink();
        metrics.timer_record(HANDLER_DURATION, &[("key", "k"), ("handler", "h")], 2_000_000);
        let histogram = metrics.handler_duration.with_label_values(&["k", "h"]);
        assert_eq!(histogram.get_sample_count(), 1);
        assert!((histogram.get_sample_sum() - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_names_ignored() {
        let (registry, metrics) = sink();
        metrics.counter_increment("eventbus.unknown", &[("key", "k")]);
        metrics.timer_record("eventbus.other", &[], 1);
        let text = encode_registry(&registry).expect("encode");
        assert!(!text.contains("unknown"));
    }

    #[test]
    fn test_missing_tag_is_empty_label() {
        assert_eq!(label_values(HANDLER_LABELS, &[("key", "k")]), vec!["k", ""]);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PrometheusMetrics::register(&registry, "dup").expect("first");
        assert!(matches!(
            PrometheusMetrics::register(&registry, "dup"),
            Err(TelemetryError::MetricsInit(_))
        ));
    }

    #[test]
    fn test_encode_uses_namespace() {
        let (registry, metrics) = sink();
        metrics.counter_increment(UNHANDLED, &[("key", "orphan")]);
        let text = encode_registry(&registry).expect("encode");
        assert!(text.contains("test_events_unhandled_total{key=\"orphan\"} 1"));
    }
}

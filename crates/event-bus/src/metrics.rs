//! # Metrics Hooks
//!
//! The bus reports counters and timers through a [`MetricsSink`]; it never
//! owns a registry or a reporter. `bus-telemetry` ships a Prometheus sink,
//! tests use [`RecordingMetrics`].
//!
//! All names follow `eventbus.<what>`; tags are `(name, value)` pairs.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Events accepted by `emit` (tag: `key`).
pub const EMITTED: &str = "eventbus.emitted";
/// Events discarded by the DROP policy (tag: `key`).
pub const DROPPED: &str = "eventbus.dropped";
/// Events evicted by the LATEST policy (tag: `key`).
pub const EVICTED: &str = "eventbus.evicted";
/// Emits that found no live Subscription (tag: `key`).
pub const UNHANDLED: &str = "eventbus.unhandled";
/// Events handed to a Subscription's handlers (tag: `key`).
pub const DELIVERED: &str = "eventbus.delivered";
/// Handler invocation time (tags: `key`, `handler`).
pub const HANDLER_DURATION: &str = "eventbus.handler.duration";
/// Handler invocations that failed (tags: `key`, `handler`).
pub const HANDLER_FAILURES: &str = "eventbus.handler.failures";

/// Metric tags.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// External metrics sink contract.
pub trait MetricsSink: Send + Sync {
    /// Increment the counter `name` by one.
    fn counter_increment(&self, name: &str, tags: Tags<'_>);

    /// Record one timer observation in nanoseconds.
    fn timer_record(&self, name: &str, tags: Tags<'_>, duration_nanos: u64);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter_increment(&self, _name: &str, _tags: Tags<'_>) {}

    fn timer_record(&self, _name: &str, _tags: Tags<'_>, _duration_nanos: u64) {}
}

/// Shared handle to a sink.
pub type SharedMetrics = Arc<dyn MetricsSink>;

type SeriesKey = (String, Vec<(String, String)>);

/// In-memory sink that keeps every series it sees.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<BTreeMap<SeriesKey, u64>>,
    timers: Mutex<BTreeMap<SeriesKey, Vec<u64>>>,
}

impl RecordingMetrics {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of a counter across all tag sets.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Counter value for sets that contain the given tag.
    #[must_use]
    pub fn counter_tagged(&self, name: &str, tag: (&str, &str)) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|((n, tags), _)| n == name && has_tag(tags, tag))
            .map(|(_, v)| *v)
            .sum()
    }

    /// Number of observations of a timer across all tag sets.
    #[must_use]
    pub fn timer_count(&self, name: &str) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, v)| v.len())
            .sum()
    }

    /// Observations of a timer for sets that contain the given tag.
    #[must_use]
    pub fn timer_samples(&self, name: &str, tag: (&str, &str)) -> Vec<u64> {
        self.timers
            .lock()
            .iter()
            .filter(|((n, tags), _)| n == name && has_tag(tags, tag))
            .flat_map(|(_, v)| v.iter().copied())
            .collect()
    }
}

fn has_tag(tags: &[(String, String)], (name, value): (&str, &str)) -> bool {
    tags.iter().any(|(n, v)| n == name && v == value)
}

fn series(name: &str, tags: Tags<'_>) -> SeriesKey {
    (
        name.to_string(),
        tags.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    )
}

impl MetricsSink for RecordingMetrics {
    fn counter_increment(&self, name: &str, tags: Tags<'_>) {
        *self.counters.lock().entry(series(name, tags)).or_insert(0) += 1;
    }

    fn timer_record(&self, name: &str, tags: Tags<'_>, duration_nanos: u64) {
        self.timers
            .lock()
            .entry(series(name, tags))
            .or_default()
            .push(duration_nanos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_counters() {
        let metrics = RecordingMetrics::new();
        metrics.counter_increment(EMITTED, &[("key", "a")]);
        metrics.counter_increment(EMITTED, &[("key", "a")]);
        metrics.counter_increment(EMITTED, &[("key", "b")]);

        assert_eq!(metrics.counter(EMITTED), 3);
        assert_eq!(metrics.counter_tagged(EMITTED, ("key", "a")), 2);
        assert_eq!(metrics.counter(DROPPED), 0);
    }

    #[test]
    fn test_recording_timers() {
        let metrics = RecordingMetrics::new();
        metrics.timer_record(HANDLER_DURATION, &[("key", "a"), ("handler", "h")], 10);
        metrics.timer_record(HANDLER_DURATION, &[("key", "a"), ("handler", "h")], 20);

        assert_eq!(metrics.timer_count(HANDLER_DURATION), 2);
        assert_eq!(
            metrics.timer_samples(HANDLER_DURATION, ("handler", "h")),
            vec![10, 20]
        );
    }

    #[test]
    fn test_noop_accepts_everything() {
        let sink: SharedMetrics = Arc::new(NoopMetrics);
        sink.counter_increment(EMITTED, &[]);
        sink.timer_record(HANDLER_DURATION, &[], 1);
    }
}

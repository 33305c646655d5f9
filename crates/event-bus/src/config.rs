//! # Bus Configuration
//!
//! [`EventBusConfig`] is fixed at bus construction. It can be built in code,
//! deserialized (e.g. from a TOML/JSON section owned by the host application),
//! or read from environment variables.

use crate::channel::BackpressureStrategy;
use crate::error::{BusError, BusResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Default per-Subscription channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Thread/worker scheduling strategy used to run handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchMode {
    /// Handlers run inside `emit`, on the producer's thread.
    CurrentThread,
    /// One dedicated worker thread serializes every delivery.
    SingleThread,
    /// `parallelism` worker threads, concurrent across Subscriptions.
    FixedPool,
    /// Work-stealing pool, concurrent across Subscriptions.
    WorkStealing,
}

impl DispatchMode {
    /// Canonical configuration name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentThread => "CURRENT_THREAD",
            Self::SingleThread => "SINGLE_THREAD",
            Self::FixedPool => "FIXED_POOL",
            Self::WorkStealing => "WORK_STEALING",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchMode {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CURRENT_THREAD" | "IMMEDIATE" | "SYNC" => Ok(Self::CurrentThread),
            "SINGLE_THREAD" | "EVENT_LOOP" => Ok(Self::SingleThread),
            "FIXED_POOL" | "THREAD_POOL" => Ok(Self::FixedPool),
            "WORK_STEALING" => Ok(Self::WorkStealing),
            other => Err(BusError::config(format!("unknown dispatch mode '{other}'"))),
        }
    }
}

/// Immutable bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventBusConfig {
    /// Scheduling strategy for handler execution.
    pub dispatch_mode: DispatchMode,
    /// Worker count for pooled modes. `0` derives it from the CPU count.
    pub parallelism: usize,
    /// Overflow policy for Subscriptions without a per-handler override.
    pub default_backpressure: BackpressureStrategy,
    /// Channel capacity (initial capacity for unbounded policies).
    pub channel_capacity: usize,
    /// Log a diagnostic when an event is emitted with no live Subscription.
    pub warn_on_unhandled_event: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::SingleThread,
            parallelism: 0,
            default_backpressure: BackpressureStrategy::Buffer,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            warn_on_unhandled_event: true,
        }
    }
}

impl EventBusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVENTBUS_DISPATCH_MODE`: CURRENT_THREAD | SINGLE_THREAD | FIXED_POOL | WORK_STEALING
    /// - `EVENTBUS_PARALLELISM`: worker count (default: 0 = CPU count)
    /// - `EVENTBUS_BACKPRESSURE`: BUFFER | DROP | LATEST | ERROR | UNBOUNDED
    /// - `EVENTBUS_CHANNEL_CAPACITY`: per-Subscription capacity (default: 1024)
    /// - `EVENTBUS_WARN_UNHANDLED`: true/false (default: true)
    ///
    /// Unparsable values are logged and replaced by the default.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dispatch_mode: parse_env("EVENTBUS_DISPATCH_MODE", defaults.dispatch_mode),
            parallelism: parse_env("EVENTBUS_PARALLELISM", defaults.parallelism),
            default_backpressure: parse_env(
                "EVENTBUS_BACKPRESSURE",
                defaults.default_backpressure,
            ),
            channel_capacity: parse_env("EVENTBUS_CHANNEL_CAPACITY", defaults.channel_capacity),
            warn_on_unhandled_event: parse_env(
                "EVENTBUS_WARN_UNHANDLED",
                defaults.warn_on_unhandled_event,
            ),
        }
    }

    /// Check that the configuration can back a running bus.
    pub fn validate(&self) -> BusResult<()> {
        if self.channel_capacity == 0 {
            return Err(BusError::config("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Worker count after resolving `parallelism = 0`.
    #[must_use]
    pub fn resolved_parallelism(&self) -> usize {
        match self.parallelism {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(variable = name, value = %raw, error = %e, "Ignoring invalid setting");
            default
        }),
        Err(_) => default,
    }
}

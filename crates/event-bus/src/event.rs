//! # Events
//!
//! An [`Event`] is the unit that flows through the bus: a key, a per-bus
//! emission sequence number and an ordered list of untyped payload values.
//! Cloning is cheap; every Subscription the event fans out to shares the
//! same payload allocation.

use crate::key::EventKey;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// A single emission on the bus.
#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

#[derive(Debug)]
struct EventInner {
    key: EventKey,
    sequence: u64,
    args: Vec<Value>,
    emitted_at: Instant,
}

impl Event {
    pub(crate) fn new(key: EventKey, sequence: u64, args: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                key,
                sequence,
                args,
                emitted_at: Instant::now(),
            }),
        }
    }

    /// The stream this event was emitted on.
    #[must_use]
    pub fn key(&self) -> &EventKey {
        &self.inner.key
    }

    /// Per-bus emission sequence number. Monotonic across all keys of one bus.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// All payload values in emission order.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    /// The payload value at `index`, if the producer supplied one.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.inner.args.get(index)
    }

    /// When the event was emitted.
    #[must_use]
    pub fn emitted_at(&self) -> Instant {
        self.inner.emitted_at
    }

    /// Arguments bound to a handler of the given arity.
    ///
    /// Missing trailing positions are `None`; surplus arguments are ignored.
    #[must_use]
    pub fn bind(&self, arity: usize) -> Vec<Option<&Value>> {
        (0..arity).map(|i| self.arg(i)).collect()
    }
}

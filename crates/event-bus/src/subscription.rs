//! # Subscriptions
//!
//! A [`Subscription`] is the live binding of one key to an ordered handler
//! list and one backpressure channel. Handlers of one key that share the same
//! effective overflow policy and thread affinity share one Subscription.
//!
//! The handler list is copy-on-write: delivery clones an `Arc` snapshot, so
//! registration never waits for a running handler and a removal only affects
//! deliveries that start after it.
//!
//! ## Drain protocol
//!
//! Pool dispatchers must never run two drains of the same Subscription at
//! once, or per-Subscription FIFO would break. The `scheduled` flag is the
//! mailbox guard: whoever flips it `false -> true` owns the next drain, and
//! the drainer re-checks the channel after clearing it so that an event
//! offered during the hand-off is never stranded.
//!
//! Inline Subscriptions (caller affinity, or any Subscription of a
//! current-thread bus) bypass the channel: `emit` hands the event straight
//! to [`Subscription::deliver_inline`] on the producer's thread, holding no
//! lock while handlers run.

use crate::channel::{BackpressureChannel, BackpressureStrategy, Offer};
use crate::error::BusResult;
use crate::event::Event;
use crate::handler::{Affinity, HandlerDescriptor, HandlerId};
use crate::key::EventKey;
use crate::metrics::{SharedMetrics, DELIVERED};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// What distinguishes two Subscriptions of the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKind {
    /// Effective overflow policy of the channel.
    pub backpressure: BackpressureStrategy,
    /// Where the handlers run.
    pub affinity: Affinity,
}

/// Live binding of a key to handlers and a channel.
pub struct Subscription {
    key: EventKey,
    kind: SubscriptionKind,
    handlers: RwLock<Arc<Vec<Arc<HandlerDescriptor>>>>,
    channel: BackpressureChannel,
    scheduled: AtomicBool,
    delivered: AtomicU64,
    metrics: SharedMetrics,
}

impl Subscription {
    /// Create an empty Subscription.
    #[must_use]
    pub fn new(
        key: EventKey,
        kind: SubscriptionKind,
        capacity: usize,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            channel: BackpressureChannel::new(key.clone(), kind.backpressure, capacity),
            key,
            kind,
            handlers: RwLock::new(Arc::new(Vec::new())),
            scheduled: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            metrics,
        }
    }

    /// The key this Subscription listens on.
    #[must_use]
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Policy and affinity.
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Whether deliveries bypass the bus dispatcher.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.kind.affinity == Affinity::Caller
    }

    /// The backing channel.
    #[must_use]
    pub fn channel(&self) -> &BackpressureChannel {
        &self.channel
    }

    /// Current handler list, in registration order.
    #[must_use]
    pub fn handlers(&self) -> Arc<Vec<Arc<HandlerDescriptor>>> {
        self.handlers.read().clone()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Events handed to handlers so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Append a handler.
    pub fn add_handler(&self, handler: Arc<HandlerDescriptor>) {
        let mut guard = self.handlers.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(handler);
        *guard = Arc::new(next);
    }

    /// Remove handlers matching `predicate`; returns how many were removed
    /// and how many remain.
    pub fn remove_handlers<F>(&self, predicate: F) -> (usize, usize)
    where
        F: Fn(&HandlerDescriptor) -> bool,
    {
        let mut guard = self.handlers.write();
        let next: Vec<_> = guard.iter().filter(|h| !predicate(h)).cloned().collect();
        let removed = guard.len() - next.len();
        if removed > 0 {
            *guard = Arc::new(next);
        }
        (removed, guard.len())
    }

    /// Whether a handler with `id` is registered here.
    #[must_use]
    pub fn contains(&self, id: HandlerId) -> bool {
        self.handlers.read().iter().any(|h| h.id() == id)
    }

    /// Offer an event to the channel.
    pub fn offer(&self, event: Event) -> BusResult<Offer> {
        self.channel.offer(event)
    }

    /// Run every handler for `event`, isolating failures.
    pub fn deliver(&self, event: &Event) {
        let handlers = self.handlers();
        for handler in handlers.iter() {
            // Failures are already logged and counted by the boundary.
            let _ = handler.invoke(event, self.metrics.as_ref());
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .counter_increment(DELIVERED, &[("key", self.key.as_str())]);
    }

    /// Deliver the oldest queued event, if any.
    pub fn deliver_one(&self) -> bool {
        match self.channel.poll() {
            Some(event) => {
                self.deliver(&event);
                true
            }
            None => false,
        }
    }

    /// Run the handlers for `event` on the calling thread, skipping the
    /// channel. Returns `false` once the Subscription has been torn down.
    ///
    /// Producers on different threads run concurrently; a handler that emits
    /// again sees its nested event delivered before that `emit` returns.
    pub fn deliver_inline(&self, event: &Event) -> bool {
        if self.channel.is_closed() {
            return false;
        }
        self.deliver(event);
        true
    }

    /// Claim the next pooled drain. `true` means the caller must schedule one.
    pub fn try_schedule(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Body of a pooled drain task.
    pub fn run_drain(&self) {
        loop {
            while self.deliver_one() {}
            self.scheduled.store(false, Ordering::Release);
            if self.channel.is_empty() || !self.try_schedule() {
                break;
            }
        }
    }

    /// Tear down the channel, discarding undelivered events.
    pub fn close(&self) -> usize {
        let discarded = self.channel.close();
        debug!(
            key = %self.key,
            backpressure = %self.kind.backpressure,
            discarded,
            "Subscription closed"
        );
        discarded
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("handlers", &self.handler_count())
            .field("queued", &self.channel.len())
            .finish()
    }
}

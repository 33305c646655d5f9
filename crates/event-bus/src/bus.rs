//! # Event Bus
//!
//! The public facade. One [`EventBus`] owns one dispatcher, one handler
//! registry and, through the registry, every Subscription and channel.
//! Handles are cheap clones of the same bus.
//!
//! ## Emission path
//!
//! ```text
//! emit(key, args)
//!   └─ sequence += 1
//!   └─ for each Subscription of key
//!        └─ inline?  run handlers now, on the producer's thread
//!        └─ otherwise
//!             └─ channel.offer(event)      BUFFER | DROP | LATEST | ERROR
//!             └─ dispatcher.dispatch(subscription)
//! ```
//!
//! A Subscription is inline when its handlers have caller affinity. On a
//! current-thread bus every handler of a key shares one inline Subscription,
//! so handlers run in registration order and overflow policies never apply.
//!
//! Worker threads live until [`EventBus::shutdown`] or until the last handle
//! is dropped. A handler that captures a clone of its own bus keeps the bus
//! alive; such buses must be shut down explicitly.

use crate::binder::{BindingTable, EventListener};
use crate::channel::{BackpressureStrategy, Offer};
use crate::config::{DispatchMode, EventBusConfig};
use crate::dispatcher::{self, Dispatcher};
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::handler::{Affinity, Handler, HandlerDescriptor, HandlerId};
use crate::key::EventKey;
use crate::metrics::{
    NoopMetrics, SharedMetrics, DROPPED, EMITTED, EVICTED, UNHANDLED,
};
use crate::registry::HandlerRegistry;
use crate::stream::EventStream;
use crate::subscription::{Subscription, SubscriptionKind};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Point-in-time counters of one bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted by `emit`.
    pub emitted: u64,
    /// Events discarded by DROP channels.
    pub dropped: u64,
    /// Events evicted by LATEST channels.
    pub evicted: u64,
    /// Offers refused by ERROR channels.
    pub rejected: u64,
    /// Unhandled-event diagnostics logged.
    pub unhandled: u64,
    /// Live Subscriptions.
    pub subscriptions: usize,
    /// Registered handlers.
    pub handlers: usize,
    /// Events queued but not yet delivered.
    pub queued: usize,
}

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    unhandled: AtomicU64,
}

struct BusInner {
    id: Uuid,
    name: String,
    config: EventBusConfig,
    registry: HandlerRegistry,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: SharedMetrics,
    sequence: AtomicU64,
    next_handler: AtomicU64,
    counters: Counters,
    shut_down: AtomicBool,
}

impl BusInner {
    fn ensure_running(&self) -> BusResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(BusError::ShutDown);
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dispatcher.shutdown();
        let discarded = self.registry.clear();
        info!(
            bus = %self.id,
            name = %self.name,
            emitted = self.counters.emitted.load(Ordering::Relaxed),
            discarded,
            "Event bus shut down"
        );
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Typed publish/subscribe bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Build a bus from `config` with no metrics sink.
    pub fn new(config: EventBusConfig) -> BusResult<Self> {
        Self::builder().config(config).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Unique id of this bus, used in logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Name used for worker threads and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The configuration the bus was built with.
    #[must_use]
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// The active dispatch mode.
    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.inner.dispatcher.mode()
    }

    /// Threads that may run handlers concurrently.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.inner.dispatcher.parallelism()
    }

    /// Emit an event and return its sequence number.
    ///
    /// Never blocks on consumers except in current-thread mode (or for
    /// caller-affinity handlers), where the handlers run before this returns.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty key
    /// - `BackpressureExceeded` if an ERROR-policy channel is full; the event
    ///   is still offered to the key's other Subscriptions
    /// - `ShutDown` after [`shutdown`](Self::shutdown)
    pub fn emit<K: Into<EventKey>>(&self, key: K, args: Vec<Value>) -> BusResult<u64> {
        let key = key.into();
        key.validate()?;
        let inner = &*self.inner;
        inner.ensure_running()?;

        let sequence = inner.sequence.fetch_add(1, Ordering::SeqCst);
        inner.counters.emitted.fetch_add(1, Ordering::Relaxed);
        inner
            .metrics
            .counter_increment(EMITTED, &[("key", key.as_str())]);

        let subscriptions = inner.registry.subscriptions_for(&key);
        if subscriptions.is_empty() {
            inner
                .metrics
                .counter_increment(UNHANDLED, &[("key", key.as_str())]);
            if inner.config.warn_on_unhandled_event {
                inner.counters.unhandled.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, sequence, "No handlers registered for event");
            }
            return Ok(sequence);
        }

        let event = Event::new(key, sequence, args);
        let mut rejected = None;
        for subscription in &subscriptions {
            if subscription.is_inline() {
                subscription.deliver_inline(&event);
                continue;
            }
            match subscription.offer(event.clone()) {
                Ok(Offer::Enqueued) => self.schedule(subscription),
                Ok(Offer::Evicted(evicted)) => {
                    inner.counters.evicted.fetch_add(1, Ordering::Relaxed);
                    inner
                        .metrics
                        .counter_increment(EVICTED, &[("key", event.key().as_str())]);
                    debug!(
                        key = %event.key(),
                        evicted = evicted.sequence(),
                        sequence,
                        "Oldest queued event evicted"
                    );
                    self.schedule(subscription);
                }
                Ok(Offer::Dropped) => {
                    inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    inner
                        .metrics
                        .counter_increment(DROPPED, &[("key", event.key().as_str())]);
                    debug!(key = %event.key(), sequence, "Event dropped, channel full");
                }
                Ok(Offer::Closed) => {}
                Err(e) => {
                    inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %event.key(), sequence, error = %e, "Event rejected");
                    rejected.get_or_insert(e);
                }
            }
        }

        match rejected {
            Some(e) => Err(e),
            None => Ok(sequence),
        }
    }

    fn schedule(&self, subscription: &Arc<Subscription>) {
        self.inner.dispatcher.dispatch(subscription);
    }

    /// Register `handler` on `key`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty key
    /// - `Configuration` for a handler shape that cannot be invoked
    /// - `ShutDown` after [`shutdown`](Self::shutdown)
    pub fn subscribe<K: Into<EventKey>>(&self, key: K, handler: Handler) -> BusResult<Registration> {
        let key = key.into();
        key.validate()?;
        self.inner.ensure_running()?;
        let id = self.install(&key, handler)?;
        Ok(Registration {
            bus: Arc::downgrade(&self.inner),
            key,
            id,
        })
    }

    /// Open a stream of every event emitted on `key` from now on.
    pub fn on<K: Into<EventKey>>(&self, key: K) -> BusResult<EventStream> {
        let key = key.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler = Handler::for_event(move |event| {
            sender
                .send(event.clone())
                .map_err(|_| anyhow::anyhow!("event stream receiver dropped"))
        })
        .named(format!("stream:{key}"));
        let registration = self.subscribe(key, handler)?;
        Ok(EventStream::new(receiver, registration))
    }

    /// Remove one handler from `key`. Returns `false` if it was not there.
    pub fn off<K: Into<EventKey>>(&self, key: K, id: HandlerId) -> bool {
        let key = key.into();
        let removed = self.inner.registry.remove(&key, id);
        if removed {
            debug!(key = %key, handler = %id, "Handler removed");
        }
        removed
    }

    /// Remove every handler owned by `owner`.
    pub fn off_owner(&self, owner: &str) -> usize {
        self.inner.registry.remove_owner(owner)
    }

    /// Register every handler a listener declares, all or nothing.
    ///
    /// # Errors
    ///
    /// `Configuration` if any declared row is invalid; nothing is installed.
    pub fn register<L: EventListener>(&self, listener: Arc<L>) -> BusResult<ListenerRegistration> {
        self.inner.ensure_running()?;
        let owner = listener.name().to_string();
        let mut table = BindingTable::new(owner.as_str());
        listener.bind(&mut table);
        table.validate()?;

        let bindings = table.into_bindings();
        if bindings.is_empty() {
            warn!(owner = %owner, "Listener declared no handlers");
        }

        let mut ids = Vec::new();
        for binding in bindings {
            let (keys, handler) = binding.into_parts();
            for key in keys {
                match self.install(&key, handler.clone()) {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        self.inner.registry.remove_all(&ids);
                        return Err(e);
                    }
                }
            }
        }

        debug!(owner = %owner, handlers = ids.len(), "Listener registered");
        Ok(ListenerRegistration {
            bus: Arc::downgrade(&self.inner),
            owner,
            ids,
        })
    }

    fn install(&self, key: &EventKey, handler: Handler) -> BusResult<HandlerId> {
        let inner = &*self.inner;
        let id = HandlerId(inner.next_handler.fetch_add(1, Ordering::Relaxed) + 1);
        let descriptor = Arc::new(HandlerDescriptor::new(id, handler)?);
        let kind = if inner.dispatcher.mode() == DispatchMode::CurrentThread {
            SubscriptionKind {
                backpressure: inner.config.default_backpressure,
                affinity: Affinity::Caller,
            }
        } else {
            SubscriptionKind {
                backpressure: descriptor
                    .backpressure()
                    .unwrap_or(inner.config.default_backpressure),
                affinity: descriptor.affinity(),
            }
        };
        debug!(
            key = %key,
            handler = %descriptor.name(),
            arity = descriptor.arity(),
            backpressure = %kind.backpressure,
            "Handler registered"
        );
        let capacity = inner.config.channel_capacity;
        let metrics = inner.metrics.clone();
        inner.registry.insert(key, kind, descriptor, || {
            Subscription::new(key.clone(), kind, capacity, metrics)
        });
        Ok(id)
    }

    /// Whether any handler listens on `key`.
    #[must_use]
    pub fn has_subscribers<K: Into<EventKey>>(&self, key: K) -> bool {
        self.inner.registry.has_subscribers(&key.into())
    }

    /// Handlers registered on `key`.
    #[must_use]
    pub fn handler_count<K: Into<EventKey>>(&self, key: K) -> usize {
        self.inner.registry.handler_count(&key.into())
    }

    /// Keys with at least one handler, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<EventKey> {
        self.inner.registry.keys()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let inner = &*self.inner;
        let queued = inner
            .registry
            .keys()
            .iter()
            .flat_map(|key| inner.registry.subscriptions_for(key))
            .map(|sub| sub.channel().len())
            .sum();
        BusStats {
            emitted: inner.counters.emitted.load(Ordering::Relaxed),
            dropped: inner.counters.dropped.load(Ordering::Relaxed),
            evicted: inner.counters.evicted.load(Ordering::Relaxed),
            rejected: inner.counters.rejected.load(Ordering::Relaxed),
            unhandled: inner.counters.unhandled.load(Ordering::Relaxed),
            subscriptions: inner.registry.subscription_count(),
            handlers: inner.registry.total_handlers(),
            queued,
        }
    }

    /// Finish queued deliveries, stop and join the workers, then tear down
    /// every Subscription. Later calls are no-ops.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("mode", &self.inner.dispatcher.mode())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Builder for [`EventBus`].
#[derive(Default)]
pub struct EventBusBuilder {
    config: EventBusConfig,
    metrics: Option<SharedMetrics>,
    name: Option<String>,
}

impl EventBusBuilder {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Scheduling strategy.
    #[must_use]
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    /// Worker count for pooled modes (`0` = CPU count).
    #[must_use]
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    /// Default overflow policy.
    #[must_use]
    pub fn default_backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.config.default_backpressure = strategy;
        self
    }

    /// Per-Subscription channel capacity.
    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Log when an event has no subscriber.
    #[must_use]
    pub fn warn_on_unhandled_event(mut self, enabled: bool) -> Self {
        self.config.warn_on_unhandled_event = enabled;
        self
    }

    /// Metrics sink for counters and timers.
    #[must_use]
    pub fn metrics(mut self, sink: SharedMetrics) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Name for worker threads and logs (default `eventbus`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validate the configuration and start the dispatcher.
    pub fn build(self) -> BusResult<EventBus> {
        self.config.validate()?;
        let name = self.name.unwrap_or_else(|| "eventbus".to_string());
        let dispatcher = dispatcher::for_config(&self.config, &name)?;
        let id = Uuid::new_v4();
        info!(
            bus = %id,
            name = %name,
            mode = %dispatcher.mode(),
            parallelism = dispatcher.parallelism(),
            backpressure = %self.config.default_backpressure,
            "Event bus started"
        );
        Ok(EventBus {
            inner: Arc::new(BusInner {
                id,
                name,
                config: self.config,
                registry: HandlerRegistry::new(),
                dispatcher,
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
                sequence: AtomicU64::new(0),
                next_handler: AtomicU64::new(0),
                counters: Counters::default(),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

/// Cancellation handle for one handler.
///
/// Dropping it leaves the handler registered; call [`dispose`](Self::dispose).
#[derive(Debug)]
pub struct Registration {
    bus: Weak<BusInner>,
    key: EventKey,
    id: HandlerId,
}

impl Registration {
    /// The handler's id.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// The key the handler listens on.
    #[must_use]
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Whether the handler is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.bus.upgrade().is_some_and(|bus| {
            bus.registry
                .subscriptions_for(&self.key)
                .iter()
                .any(|s| s.contains(self.id))
        })
    }

    /// Remove the handler. Returns `false` if it was already gone.
    pub fn dispose(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.registry.remove(&self.key, self.id))
    }
}

/// Cancellation handle for every handler of one listener.
#[derive(Debug)]
pub struct ListenerRegistration {
    bus: Weak<BusInner>,
    owner: String,
    ids: Vec<HandlerId>,
}

impl ListenerRegistration {
    /// The listener's owner identity.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// One id per installed `(key, handler)` pair.
    #[must_use]
    pub fn handler_ids(&self) -> &[HandlerId] {
        &self.ids
    }

    /// Remove every handler this registration installed.
    pub fn dispose(&self) -> usize {
        self.bus
            .upgrade()
            .map_or(0, |bus| bus.registry.remove_all(&self.ids))
    }
}

impl fmt::Debug for BusInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusInner")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

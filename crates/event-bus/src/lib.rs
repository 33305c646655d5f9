//! # Event Bus - In-Process Event Dispatch Core
//!
//! A publish/subscribe bus that decouples producers from consumers inside one
//! process.
//!
//! ```text
//!  producer ──emit(key, args)──▶ ┌──────────────┐
//!                                │   EventBus   │
//!                                │  (registry)  │
//!                                └──────┬───────┘
//!                     ┌─────────────────┼─────────────────┐
//!                     ▼                 ▼                 ▼
//!              ┌────────────┐    ┌────────────┐    ┌────────────┐
//!              │Subscription│    │Subscription│    │Subscription│
//!              │  channel   │    │  channel   │    │  channel   │
//!              └─────┬──────┘    └─────┬──────┘    └─────┬──────┘
//!                    └────────── Dispatcher ─────────────┘
//!                         current | loop | pool | steal
//! ```
//!
//! ## Guarantees
//!
//! - Handlers of one Subscription see events in the order they were enqueued
//! - A failing or panicking handler never affects its siblings or the producer
//! - `emit` fails only for an empty key, a shut-down bus, or a full ERROR channel
//!
//! ## Usage
//!
//! ```rust,ignore
//! use event_bus::{emit, EventBus, DispatchMode, Handler};
//!
//! let bus = EventBus::builder()
//!     .dispatch_mode(DispatchMode::FixedPool)
//!     .parallelism(4)
//!     .build()?;
//!
//! bus.subscribe("order.placed", Handler::binary(|id, qty| {
//!     tracing::info!(?id, ?qty, "order placed");
//!     Ok(())
//! }))?;
//!
//! emit!(bus, "order.placed", "A-17", 3)?;
//! bus.shutdown();
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod binder;
pub mod bus;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod stream;
pub mod subscription;

// Re-export main types
pub use binder::{Binding, BindingBuilder, BindingTable, EventListener};
pub use bus::{BusStats, EventBus, EventBusBuilder, ListenerRegistration, Registration};
pub use channel::{BackpressureChannel, BackpressureStrategy, Offer, RingBuffer};
pub use config::{DispatchMode, EventBusConfig, DEFAULT_CHANNEL_CAPACITY};
pub use dispatcher::Dispatcher;
pub use error::{BusError, BusResult};
pub use event::Event;
pub use handler::{Affinity, Handler, HandlerDescriptor, HandlerId, HandlerResult, MAX_ARITY};
pub use key::EventKey;
pub use metrics::{MetricsSink, NoopMetrics, RecordingMetrics, SharedMetrics};
pub use stream::{EventStream, StreamError};
pub use subscription::{Subscription, SubscriptionKind};

#[doc(hidden)]
pub use serde_json;

/// Emit an event whose arguments are any `serde_json::json!`-compatible
/// expressions.
///
/// ```rust,ignore
/// emit!(bus, "order.placed", "A-17", 3)?;
/// ```
#[macro_export]
macro_rules! emit {
    ($bus:expr, $key:expr $(, $arg:expr)* $(,)?) => {
        $bus.emit($key, vec![$($crate::serde_json::json!($arg)),*])
    };
}

//! # Dispatcher Strategies
//!
//! A [`Dispatcher`] decides where and when the handlers of a Subscription run
//! once an event has been accepted by its channel.
//!
//! | Mode | Runs on | Ordering |
//! |------|---------|----------|
//! | `CURRENT_THREAD` | the producer, inside `emit` | per Subscription |
//! | `SINGLE_THREAD` | one worker thread | global across Subscriptions |
//! | `FIXED_POOL` | `parallelism` worker threads | per Subscription |
//! | `WORK_STEALING` | a rayon pool | per Subscription |
//!
//! Pooled workers block on their task queue, never the producer.

mod current_thread;
mod event_loop;
mod fixed_pool;
mod queue;
mod work_stealing;

pub use current_thread::CurrentThreadDispatcher;
pub use event_loop::EventLoopDispatcher;
pub use fixed_pool::FixedPoolDispatcher;
pub use work_stealing::WorkStealingDispatcher;

use crate::config::{DispatchMode, EventBusConfig};
use crate::error::BusResult;
use crate::subscription::Subscription;
use std::fmt;
use std::sync::Arc;

/// Schedules handler execution for Subscriptions with pending events.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// The strategy this dispatcher implements.
    fn mode(&self) -> DispatchMode;

    /// Number of threads that may run handlers concurrently.
    fn parallelism(&self) -> usize;

    /// Called once per event accepted into `subscription`'s channel.
    fn dispatch(&self, subscription: &Arc<Subscription>);

    /// Finish queued work, then stop and join the workers. Idempotent.
    fn shutdown(&self);
}

/// Build the dispatcher selected by `config`.
///
/// `name` labels worker threads.
pub fn for_config(config: &EventBusConfig, name: &str) -> BusResult<Arc<dyn Dispatcher>> {
    let dispatcher: Arc<dyn Dispatcher> = match config.dispatch_mode {
        DispatchMode::CurrentThread => Arc::new(CurrentThreadDispatcher),
        DispatchMode::SingleThread => Arc::new(EventLoopDispatcher::start(name)?),
        DispatchMode::FixedPool => Arc::new(FixedPoolDispatcher::start(
            name,
            config.resolved_parallelism(),
        )?),
        DispatchMode::WorkStealing => Arc::new(WorkStealingDispatcher::start(
            name,
            config.resolved_parallelism(),
        )?),
    };
    Ok(dispatcher)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::channel::BackpressureStrategy;
    use crate::event::Event;
    use crate::handler::{Affinity, Handler, HandlerDescriptor, HandlerId};
    use crate::key::EventKey;
    use crate::metrics::NoopMetrics;
    use crate::subscription::{Subscription, SubscriptionKind};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread::ThreadId;

    pub type Log = Arc<Mutex<Vec<(String, u64, ThreadId)>>>;

    pub fn subscription(key: &str, log: &Log) -> Arc<Subscription> {
        let sub = Arc::new(Subscription::new(
            EventKey::from(key),
            SubscriptionKind {
                backpressure: BackpressureStrategy::Buffer,
                affinity: Affinity::Bus,
            },
            16,
            Arc::new(NoopMetrics),
        ));
        let log = log.clone();
        let handler = Handler::for_event(move |e| {
            log.lock()
                .push((e.key().to_string(), e.sequence(), std::thread::current().id()));
            Ok(())
        });
        sub.add_handler(Arc::new(
            HandlerDescriptor::new(HandlerId(1), handler).expect("valid"),
        ));
        sub
    }

    pub fn event(key: &str, seq: u64) -> Event {
        Event::new(EventKey::from(key), seq, vec![json!(seq)])
    }
}

//! Single dedicated worker thread.

use super::queue::{Task, ThreadWorkers};
use super::Dispatcher;
use crate::config::DispatchMode;
use crate::error::BusResult;
use crate::subscription::Subscription;
use std::fmt;
use std::sync::Arc;

/// Serializes every delivery of the bus through one worker thread.
///
/// One task is queued per accepted event and each task delivers the head of
/// its Subscription's channel, so handlers observe a single global order
/// matching emission order across all Subscriptions.
pub struct EventLoopDispatcher {
    workers: ThreadWorkers,
}

impl EventLoopDispatcher {
    /// Spawn the event-loop thread.
    pub fn start(name: &str) -> BusResult<Self> {
        Ok(Self {
            workers: ThreadWorkers::spawn(&format!("{name}-loop"), 1)?,
        })
    }
}

impl Dispatcher for EventLoopDispatcher {
    fn mode(&self) -> DispatchMode {
        DispatchMode::SingleThread
    }

    fn parallelism(&self) -> usize {
        1
    }

    fn dispatch(&self, subscription: &Arc<Subscription>) {
        self.workers.submit(Task::DeliverOne(subscription.clone()));
    }

    fn shutdown(&self) {
        self.workers.shutdown();
    }
}

impl fmt::Debug for EventLoopDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopDispatcher")
            .field("shut_down", &self.workers.is_shut_down())
            .finish()
    }
}

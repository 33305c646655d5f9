//! Fixed-size worker pool.

use super::queue::{Task, ThreadWorkers};
use super::Dispatcher;
use crate::config::DispatchMode;
use crate::error::BusResult;
use crate::subscription::Subscription;
use std::fmt;
use std::sync::Arc;

/// `N` worker threads pulling drain tasks from one shared queue.
///
/// A Subscription has at most one drain task in flight, so its events are
/// handled in FIFO order while distinct Subscriptions run concurrently.
pub struct FixedPoolDispatcher {
    workers: ThreadWorkers,
}

impl FixedPoolDispatcher {
    /// Spawn `parallelism` workers (at least one).
    pub fn start(name: &str, parallelism: usize) -> BusResult<Self> {
        Ok(Self {
            workers: ThreadWorkers::spawn(&format!("{name}-pool"), parallelism.max(1))?,
        })
    }
}

impl Dispatcher for FixedPoolDispatcher {
    fn mode(&self) -> DispatchMode {
        DispatchMode::FixedPool
    }

    fn parallelism(&self) -> usize {
        self.workers.count()
    }

    fn dispatch(&self, subscription: &Arc<Subscription>) {
        if subscription.try_schedule() {
            self.workers.submit(Task::Drain(subscription.clone()));
        }
    }

    fn shutdown(&self) {
        self.workers.shutdown();
    }
}

impl fmt::Debug for FixedPoolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPoolDispatcher")
            .field("workers", &self.workers.count())
            .field("shut_down", &self.workers.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::test_support::{event, subscription, Log};

    #[test]
    fn test_per_subscription_fifo() {
        let log = Log::default();
        let keys: Vec<String> = (0..4).map(|i| format!("k{i}")).collect();
        let subs: Vec<_> = keys.iter().map(|k| subscription(k, &log)).collect();
        let dispatcher = FixedPoolDispatcher::start("pool-test", 3).expect("start");
        assert_eq!(dispatcher.parallelism(), 3);

        for seq in 0..400u64 {
            let index = (seq % 4) as usize;
            subs[index].offer(event(&keys[index], seq)).expect("buffer");
            dispatcher.dispatch(&subs[index]);
        }
        dispatcher.shutdown();

        let log = log.lock();
        assert_eq!(log.len(), 400);
        for key in &keys {
            let seen: Vec<u64> = log
                .iter()
                .filter(|(k, _, _)| k == key)
                .map(|(_, s, _)| *s)
                .collect();
            let mut sorted = seen.clone();
            sorted.sort_unstable();
            assert_eq!(seen, sorted, "out of order for {key}");
        }
    }
}

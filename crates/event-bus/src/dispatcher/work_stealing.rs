//! Work-stealing pool backed by rayon.

use super::Dispatcher;
use crate::config::DispatchMode;
use crate::error::{BusError, BusResult};
use crate::subscription::Subscription;
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Counts drain tasks that have been spawned but not finished.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Drain tasks spawned onto a rayon pool.
///
/// Same ordering contract as the fixed pool; idle workers steal queued drains,
/// which balances buses where a few keys carry most of the traffic.
pub struct WorkStealingDispatcher {
    pool: Mutex<Option<Arc<ThreadPool>>>,
    in_flight: Arc<InFlight>,
    closed: AtomicBool,
    parallelism: usize,
}

impl WorkStealingDispatcher {
    /// Build a pool with `parallelism` threads.
    pub fn start(name: &str, parallelism: usize) -> BusResult<Self> {
        let prefix = format!("{name}-steal");
        let pool = ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()
            .map_err(|e| BusError::config(format!("failed to build work-stealing pool: {e}")))?;
        Ok(Self {
            parallelism: pool.current_num_threads(),
            pool: Mutex::new(Some(Arc::new(pool))),
            in_flight: Arc::new(InFlight::default()),
            closed: AtomicBool::new(false),
        })
    }
}

impl Dispatcher for WorkStealingDispatcher {
    fn mode(&self) -> DispatchMode {
        DispatchMode::WorkStealing
    }

    fn parallelism(&self) -> usize {
        self.parallelism
    }

    fn dispatch(&self, subscription: &Arc<Subscription>) {
        // Counted before the closed check so shutdown waits for this call.
        self.in_flight.begin();
        let pool = if self.closed.load(Ordering::Acquire) {
            None
        } else {
            self.pool.lock().clone()
        };
        match pool {
            Some(pool) if subscription.try_schedule() => {
                let subscription = subscription.clone();
                let in_flight = self.in_flight.clone();
                pool.spawn(move || {
                    subscription.run_drain();
                    in_flight.end();
                });
            }
            _ => self.in_flight.end(),
        }
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(pool) = self.pool.lock().take() else {
            return;
        };
        // A handler shutting the bus down would wait on its own drain.
        if pool.current_thread_index().is_none() {
            self.in_flight.wait_idle();
        }
    }
}

impl fmt::Debug for WorkStealingDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkStealingDispatcher")
            .field("parallelism", &self.parallelism)
            .field("shut_down", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

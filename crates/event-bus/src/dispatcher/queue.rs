//! Blocking FIFO task queue and the named worker threads that pull from it.
//! Shared by the event-loop and fixed-pool dispatchers.

use crate::error::{BusError, BusResult};
use crate::subscription::Subscription;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Unit of work for a worker thread.
pub(crate) enum Task {
    /// Deliver exactly one queued event of the Subscription.
    DeliverOne(Arc<Subscription>),
    /// Drain the Subscription until its channel is empty.
    Drain(Arc<Subscription>),
}

impl Task {
    pub(crate) fn run(self) {
        match self {
            Self::DeliverOne(subscription) => {
                subscription.deliver_one();
            }
            Self::Drain(subscription) => subscription.run_drain(),
        }
    }
}

struct QueueState {
    tasks: VecDeque<Task>,
    closed: bool,
}

pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue a task; `false` once the queue is closed.
    pub(crate) fn push(&self, task: Task) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.tasks.push_back(task);
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Block until a task is available. `None` once closed and empty.
    pub(crate) fn pop(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Stop accepting tasks and wake every worker.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Worker loop body.
    pub(crate) fn run_worker(&self) {
        while let Some(task) = self.pop() {
            task.run();
        }
    }
}

/// Fixed set of OS threads running [`TaskQueue::run_worker`].
pub(crate) struct ThreadWorkers {
    queue: Arc<TaskQueue>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    count: usize,
}

impl ThreadWorkers {
    /// Spawn `count` workers named `{name}-{index}`.
    pub(crate) fn spawn(name: &str, count: usize) -> BusResult<Self> {
        let queue = Arc::new(TaskQueue::new());
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let worker_queue = queue.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_queue.run_worker());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    queue.close();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(BusError::config(format!(
                        "failed to spawn dispatcher worker: {e}"
                    )));
                }
            }
        }
        debug!(workers = count, prefix = name, "Dispatcher workers started");
        Ok(Self {
            queue,
            handles: Mutex::new(handles),
            count,
        })
    }

    pub(crate) fn submit(&self, task: Task) -> bool {
        self.queue.push(task)
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    /// Close the queue and join every worker except the calling one.
    pub(crate) fn shutdown(&self) {
        self.queue.close();
        let handles = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // Shutdown requested from a handler; this worker exits on its own.
                continue;
            }
            if handle.join().is_err() {
                warn!("Dispatcher worker terminated abnormally");
            }
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::test_support::{event, subscription, Log};

    #[test]
    fn test_pop_after_close_drains_remaining() {
        let log = Log::default();
        let sub = subscription("k", &log);
        sub.offer(event("k", 0)).expect("buffer");

        let queue = TaskQueue::new();
        assert!(queue.push(Task::DeliverOne(sub.clone())));
        queue.close();
        assert!(!queue.push(Task::DeliverOne(sub)));

        queue.run_worker();
        assert_eq!(log.lock().len(), 1);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_workers_run_and_join() {
        let log = Log::default();
        let sub = subscription("k", &log);
        let workers = ThreadWorkers::spawn("test-worker", 2).expect("spawn");
        for i in 0..5 {
            sub.offer(event("k", i)).expect("buffer");
            assert!(workers.submit(Task::DeliverOne(sub.clone())));
        }

        workers.shutdown();

        assert_eq!(log.lock().len(), 5);
        assert!(workers.is_shut_down());
        assert!(!workers.submit(Task::Drain(sub)));
    }
}


//! Inline dispatch on the producer's thread.

use super::Dispatcher;
use crate::config::DispatchMode;
use crate::subscription::Subscription;
use std::sync::Arc;

/// Runs handlers synchronously inside `emit`.
///
/// `emit` returns only after every handler of every matching Subscription has
/// run. The bus delivers inline Subscriptions itself; `dispatch` only drains
/// whatever was offered to the channel directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentThreadDispatcher;

impl Dispatcher for CurrentThreadDispatcher {
    fn mode(&self) -> DispatchMode {
        DispatchMode::CurrentThread
    }

    fn parallelism(&self) -> usize {
        1
    }

    fn dispatch(&self, subscription: &Arc<Subscription>) {
        while subscription.deliver_one() {}
    }

    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::test_support::{event, subscription, Log};

    #[test]
    fn test_runs_on_caller_thread() {
        let log = Log::default();
        let sub = subscription("k", &log);
        sub.offer(event("k", 0)).expect("buffer");

        CurrentThreadDispatcher.dispatch(&sub);

        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].2, std::thread::current().id());
    }
}

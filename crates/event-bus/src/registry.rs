//! # Handler Registry
//!
//! Maps each key to its live Subscriptions. Emission takes a read lock just
//! long enough to clone the matching `Arc<Subscription>`s; registration and
//! removal take the write lock. Handler lists inside a Subscription are
//! copy-on-write, so neither side waits on running handlers.

use crate::handler::{HandlerDescriptor, HandlerId};
use crate::key::EventKey;
use crate::subscription::{Subscription, SubscriptionKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Owner of every Subscription of one bus.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    subscriptions: RwLock<HashMap<EventKey, Vec<Arc<Subscription>>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the Subscriptions listening on `key`.
    #[must_use]
    pub fn subscriptions_for(&self, key: &EventKey) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether any handler listens on `key`.
    #[must_use]
    pub fn has_subscribers(&self, key: &EventKey) -> bool {
        self.subscriptions.read().contains_key(key)
    }

    /// Append `handler` to the Subscription of `key` with the given kind,
    /// creating it with `create` on first use.
    pub fn insert<F>(
        &self,
        key: &EventKey,
        kind: SubscriptionKind,
        handler: Arc<HandlerDescriptor>,
        create: F,
    ) -> Arc<Subscription>
    where
        F: FnOnce() -> Subscription,
    {
        let mut map = self.subscriptions.write();
        let subs = map.entry(key.clone()).or_default();
        let subscription = match subs.iter().find(|s| s.kind() == kind) {
            Some(existing) => existing.clone(),
            None => {
                let created = Arc::new(create());
                debug!(
                    key = %key,
                    backpressure = %kind.backpressure,
                    affinity = ?kind.affinity,
                    "Subscription created"
                );
                subs.push(created.clone());
                created
            }
        };
        subscription.add_handler(handler);
        subscription
    }

    /// Remove one handler. Returns `false` if it was not registered on `key`.
    pub fn remove(&self, key: &EventKey, id: HandlerId) -> bool {
        self.remove_where(Some(key), |h| h.id() == id) > 0
    }

    /// Remove every handler whose owner is `owner`, on every key.
    pub fn remove_owner(&self, owner: &str) -> usize {
        self.remove_where(None, |h| h.owner() == Some(owner))
    }

    /// Remove the listed handlers.
    pub fn remove_all(&self, ids: &[HandlerId]) -> usize {
        self.remove_where(None, |h| ids.contains(&h.id()))
    }

    fn remove_where<F>(&self, key: Option<&EventKey>, predicate: F) -> usize
    where
        F: Fn(&HandlerDescriptor) -> bool,
    {
        let mut map = self.subscriptions.write();
        let keys: Vec<EventKey> = match key {
            Some(key) => vec![key.clone()],
            None => map.keys().cloned().collect(),
        };

        let mut removed = 0;
        for key in keys {
            let Some(subs) = map.get_mut(&key) else {
                continue;
            };
            subs.retain(|sub| {
                let (gone, remaining) = sub.remove_handlers(&predicate);
                removed += gone;
                if remaining == 0 {
                    sub.close();
                    false
                } else {
                    true
                }
            });
            if subs.is_empty() {
                map.remove(&key);
                debug!(key = %key, "Last handler removed");
            }
        }
        removed
    }

    /// Tear down every Subscription; returns the number of discarded events.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.subscriptions.write().drain().collect();
        drained
            .into_iter()
            .flat_map(|(_, subs)| subs)
            .map(|sub| sub.close())
            .sum()
    }

    /// Keys with at least one handler, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<EventKey> {
        let mut keys: Vec<_> = self.subscriptions.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Handlers registered on `key`.
    #[must_use]
    pub fn handler_count(&self, key: &EventKey) -> usize {
        self.subscriptions_for(key)
            .iter()
            .map(|s| s.handler_count())
            .sum()
    }

    /// Live Subscriptions across all keys.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().values().map(Vec::len).sum()
    }

    /// Handlers across all keys.
    #[must_use]
    pub fn total_handlers(&self) -> usize {
        self.subscriptions
            .read()
            .values()
            .flatten()
            .map(|s| s.handler_count())
            .sum()
    }
}

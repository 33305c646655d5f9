//! # Declarative Binder
//!
//! Objects that want several handlers registered at once implement
//! [`EventListener`] and describe them in a [`BindingTable`]: a flat list of
//! `(keys, handler, flags)` rows produced once at setup time. The bus
//! validates the whole table before installing anything.
//!
//! ```rust,ignore
//! struct Auditor { /* ... */ }
//!
//! impl EventListener for Auditor {
//!     fn name(&self) -> &str { "auditor" }
//!
//!     fn bind(self: Arc<Self>, table: &mut BindingTable) {
//!         let this = self.clone();
//!         table
//!             .on(["order.placed", "order.cancelled"])
//!             .named("record")
//!             .to(Handler::binary(move |id, amount| this.record(id, amount)));
//!     }
//! }
//! ```

use crate::channel::BackpressureStrategy;
use crate::error::{BusError, BusResult};
use crate::handler::Handler;
use crate::key::EventKey;
use std::sync::Arc;

/// An object that declares its own handlers.
pub trait EventListener: Send + Sync + 'static {
    /// Owner identity recorded on every handler this listener declares.
    fn name(&self) -> &str;

    /// Describe the handlers in `table`.
    fn bind(self: Arc<Self>, table: &mut BindingTable);
}

/// One row of a binding table.
#[derive(Debug, Clone)]
pub struct Binding {
    keys: Vec<EventKey>,
    handler: Handler,
}

impl Binding {
    /// Keys the handler listens on, duplicates removed.
    #[must_use]
    pub fn keys(&self) -> &[EventKey] {
        &self.keys
    }

    /// The handler to install under every key.
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub(crate) fn into_parts(self) -> (Vec<EventKey>, Handler) {
        (self.keys, self.handler)
    }
}

/// Registration table filled in by [`EventListener::bind`].
#[derive(Debug)]
pub struct BindingTable {
    owner: Arc<str>,
    rows: Vec<Binding>,
}

impl BindingTable {
    /// Empty table for `owner`.
    pub fn new(owner: impl Into<Arc<str>>) -> Self {
        Self {
            owner: owner.into(),
            rows: Vec::new(),
        }
    }

    /// Owner identity of this table.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Start a row listening on `keys`.
    pub fn on<I, K>(&mut self, keys: I) -> BindingBuilder<'_>
    where
        I: IntoIterator<Item = K>,
        K: Into<EventKey>,
    {
        BindingBuilder {
            keys: keys.into_iter().map(Into::into).collect(),
            table: self,
            name: None,
            backpressure: None,
            caller_thread: false,
            metrics: None,
        }
    }

    /// Add a fully built row.
    pub fn add<I, K>(&mut self, keys: I, handler: Handler)
    where
        I: IntoIterator<Item = K>,
        K: Into<EventKey>,
    {
        let mut unique: Vec<EventKey> = Vec::new();
        for key in keys.into_iter().map(Into::into) {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        let mut handler = handler;
        if handler.owner().is_none() {
            handler.set_owner(self.owner.clone());
        }
        self.rows.push(Binding {
            keys: unique,
            handler,
        });
    }

    /// Rows declared so far.
    #[must_use]
    pub fn bindings(&self) -> &[Binding] {
        &self.rows
    }

    /// Check every row; the first invalid one fails the whole table.
    pub fn validate(&self) -> BusResult<()> {
        for (index, row) in self.rows.iter().enumerate() {
            if row.keys.is_empty() {
                return Err(BusError::config(format!(
                    "handler #{index} of '{}' declares no event keys",
                    self.owner
                )));
            }
            for key in &row.keys {
                key.validate().map_err(|_| {
                    BusError::config(format!(
                        "handler #{index} of '{}' declares an empty event key",
                        self.owner
                    ))
                })?;
            }
            row.handler.validate().map_err(|e| {
                BusError::config(format!("handler #{index} of '{}': {e}", self.owner))
            })?;
        }
        Ok(())
    }

    /// Consume the table into its rows.
    #[must_use]
    pub fn into_bindings(self) -> Vec<Binding> {
        self.rows
    }
}

/// Builder for one [`BindingTable`] row.
#[must_use = "a binding is only recorded by `to`"]
pub struct BindingBuilder<'a> {
    table: &'a mut BindingTable,
    keys: Vec<EventKey>,
    name: Option<String>,
    backpressure: Option<BackpressureStrategy>,
    caller_thread: bool,
    metrics: Option<bool>,
}

impl BindingBuilder<'_> {
    /// Handler name for logs and metric tags.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Per-handler overflow policy.
    pub fn with_backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.backpressure = Some(strategy);
        self
    }

    /// Run on the emitting thread.
    pub fn on_caller_thread(mut self) -> Self {
        self.caller_thread = true;
        self
    }

    /// Toggle invocation timing.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = Some(enabled);
        self
    }

    /// Record the row with `handler` as its target.
    pub fn to(self, handler: Handler) {
        let mut handler = handler;
        if let Some(name) = self.name {
            handler = handler.named(name);
        }
        if let Some(strategy) = self.backpressure {
            handler = handler.with_backpressure(strategy);
        }
        if self.caller_thread {
            handler = handler.on_caller_thread();
        }
        if let Some(enabled) = self.metrics {
            handler = handler.with_metrics(enabled);
        }
        self.table.add(self.keys, handler);
    }
}

//! # Handlers
//!
//! Every handler shape (0, 1, 2, 3 or N parameters) reduces to one callable
//! taking a slice of optional arguments. The slice always has exactly the
//! declared arity: positions the event did not supply are `None`, surplus
//! event arguments are never seen.
//!
//! [`Handler`] is the mutable builder handed to the bus; the registry turns it
//! into an immutable [`HandlerDescriptor`] at registration time.

use crate::channel::BackpressureStrategy;
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::metrics::{MetricsSink, HANDLER_DURATION, HANDLER_FAILURES};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Largest parameter list a handler may declare.
pub const MAX_ARITY: usize = 8;

/// What a handler body returns.
pub type HandlerResult = anyhow::Result<()>;

type Callable = Arc<dyn Fn(&Event, &[Option<&Value>]) -> HandlerResult + Send + Sync>;

/// Per-bus handler identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

impl HandlerId {
    /// Raw numeric id.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Where a handler runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// On the bus's dispatcher (its worker threads, or inline in current-thread mode).
    #[default]
    Bus,
    /// Inline on the thread that called `emit`, whatever the dispatch mode.
    Caller,
}

/// Handler under construction.
#[derive(Clone)]
pub struct Handler {
    callable: Callable,
    arity: usize,
    name: Option<String>,
    owner: Option<Arc<str>>,
    backpressure: Option<BackpressureStrategy>,
    affinity: Affinity,
    metrics: bool,
}

impl Handler {
    /// Handler that takes no arguments.
    pub fn nullary<F>(f: F) -> Self
    where
        F: Fn() -> HandlerResult + Send + Sync + 'static,
    {
        Self::variadic(0, move |_| f())
    }

    /// Handler that takes the first event argument.
    pub fn unary<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> HandlerResult + Send + Sync + 'static,
    {
        Self::variadic(1, move |args| f(args[0]))
    }

    /// Handler that takes the first two event arguments.
    pub fn binary<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, Option<&Value>) -> HandlerResult + Send + Sync + 'static,
    {
        Self::variadic(2, move |args| f(args[0], args[1]))
    }

    /// Handler that takes the first three event arguments.
    pub fn ternary<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, Option<&Value>, Option<&Value>) -> HandlerResult
            + Send
            + Sync
            + 'static,
    {
        Self::variadic(3, move |args| f(args[0], args[1], args[2]))
    }

    /// Handler with an explicit arity; `f` always receives `arity` slots.
    pub fn variadic<F>(arity: usize, f: F) -> Self
    where
        F: Fn(&[Option<&Value>]) -> HandlerResult + Send + Sync + 'static,
    {
        Self::from_callable(arity, Arc::new(move |_, args| f(args)))
    }

    /// Handler that receives the whole event (key, sequence, all arguments).
    pub fn for_event<F>(f: F) -> Self
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        Self::from_callable(0, Arc::new(move |event, _| f(event)))
    }

    fn from_callable(arity: usize, callable: Callable) -> Self {
        Self {
            callable,
            arity,
            name: None,
            owner: None,
            backpressure: None,
            affinity: Affinity::Bus,
            metrics: true,
        }
    }

    /// Name used in logs and metric tags.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Identity of the object this handler belongs to.
    #[must_use]
    pub fn owned_by(mut self, owner: impl Into<Arc<str>>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Overflow policy overriding the bus default.
    #[must_use]
    pub fn with_backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.backpressure = Some(strategy);
        self
    }

    /// Run on the emitting thread instead of the bus dispatcher.
    #[must_use]
    pub fn on_caller_thread(mut self) -> Self {
        self.affinity = Affinity::Caller;
        self
    }

    /// Toggle invocation timing.
    #[must_use]
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    /// Declared parameter count.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn owner(&self) -> Option<&Arc<str>> {
        self.owner.as_ref()
    }

    pub(crate) fn set_owner(&mut self, owner: Arc<str>) {
        self.owner = Some(owner);
    }

    /// Reject shapes no event can invoke.
    pub fn validate(&self) -> BusResult<()> {
        if self.arity > MAX_ARITY {
            return Err(BusError::config(format!(
                "handler declares {} parameters (maximum {MAX_ARITY})",
                self.arity
            )));
        }
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(BusError::config("handler name must not be blank"));
        }
        Ok(())
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("arity", &self.arity)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("backpressure", &self.backpressure)
            .field("affinity", &self.affinity)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Validated, immutable record of one registered handler.
pub struct HandlerDescriptor {
    id: HandlerId,
    name: Arc<str>,
    owner: Option<Arc<str>>,
    arity: usize,
    backpressure: Option<BackpressureStrategy>,
    affinity: Affinity,
    metrics: bool,
    callable: Callable,
}

impl HandlerDescriptor {
    pub(crate) fn new(id: HandlerId, handler: Handler) -> BusResult<Self> {
        handler.validate()?;
        let name: Arc<str> = match handler.name {
            Some(name) => name.into(),
            None => id.to_string().into(),
        };
        Ok(Self {
            id,
            name,
            owner: handler.owner,
            arity: handler.arity,
            backpressure: handler.backpressure,
            affinity: handler.affinity,
            metrics: handler.metrics,
            callable: handler.callable,
        })
    }

    /// Per-bus identity.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Name used in logs and metric tags.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning object identity, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Declared parameter count.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Per-handler overflow policy override.
    #[must_use]
    pub fn backpressure(&self) -> Option<BackpressureStrategy> {
        self.backpressure
    }

    /// Where the handler runs.
    #[must_use]
    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Whether invocations are timed.
    #[must_use]
    pub fn metrics_enabled(&self) -> bool {
        self.metrics
    }

    /// Invoke the handler for `event` inside the failure boundary.
    ///
    /// Errors and panics raised by the body are logged, counted and returned
    /// as [`BusError::HandlerInvocation`]; callers only use the value for
    /// bookkeeping, never to stop delivery.
    pub fn invoke(&self, event: &Event, metrics: &dyn MetricsSink) -> BusResult<()> {
        let args = event.bind(self.arity);
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.callable)(event, &args)));
        let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

        let key = event.key().as_str();
        let tags = [("key", key), ("handler", &*self.name)];
        if self.metrics {
            metrics.timer_record(HANDLER_DURATION, &tags, elapsed);
        }

        let reason = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        metrics.counter_increment(HANDLER_FAILURES, &tags);
        error!(
            handler = %self.name,
            owner = self.owner.as_deref().unwrap_or("-"),
            key = %event.key(),
            sequence = event.sequence(),
            error = %reason,
            "Handler invocation failed"
        );
        Err(BusError::HandlerInvocation {
            handler: self.name.to_string(),
            key: event.key().clone(),
            reason,
        })
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("arity", &self.arity)
            .field("backpressure", &self.backpressure)
            .field("affinity", &self.affinity)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

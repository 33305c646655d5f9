//! # Bus Errors
//!
//! Every failure the dispatch core can surface to a caller.
//!
//! `InvalidArgument` and `Configuration` are raised synchronously at
//! registration or emission time. `BackpressureExceeded` is the only way
//! `emit` can fail once its arguments are valid. `HandlerInvocation` never
//! reaches a producer: it is built at the dispatch boundary, logged and
//! counted, then discarded.

use crate::key::EventKey;
use thiserror::Error;

/// Errors from event bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A caller passed an argument the bus cannot act on (empty key).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A handler or bus configuration cannot be installed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An ERROR-policy channel was full when the event arrived.
    #[error("Backpressure exceeded on '{key}' (capacity {capacity})")]
    BackpressureExceeded {
        /// The key whose channel overflowed.
        key: EventKey,
        /// The channel capacity at the time of the overflow.
        capacity: usize,
    },

    /// A handler body returned an error or panicked.
    #[error("Handler '{handler}' failed on '{key}': {reason}")]
    HandlerInvocation {
        /// Handler identity (name or generated id).
        handler: String,
        /// The key of the event being delivered.
        key: EventKey,
        /// Rendered error or panic message.
        reason: String,
    },

    /// The bus has been shut down.
    #[error("Event bus shut down")]
    ShutDown,
}

impl BusError {
    /// Shorthand for [`BusError::InvalidArgument`].
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for [`BusError::Configuration`].
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Result alias used across the crate.
pub type BusResult<T> = Result<T, BusError>;

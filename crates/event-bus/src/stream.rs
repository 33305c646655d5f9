//! # Event Streams
//!
//! [`EventStream`] is the pull-style view of a key: a handler registered on
//! the bus forwards each delivered event into an unbounded tokio channel, and
//! the stream hands them out in delivery order. Dropping the stream removes
//! its handler.

use crate::bus::Registration;
use crate::event::Event;
use crate::handler::HandlerId;
use crate::key::EventKey;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_stream::Stream;

/// Errors from stream operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The handler was removed or the bus shut down.
    #[error("Event stream closed")]
    Closed,
}

/// Stream of the events delivered on one key.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
    registration: Registration,
}

impl EventStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Event>, registration: Registration) -> Self {
        Self {
            receiver,
            registration,
        }
    }

    /// The key this stream follows.
    #[must_use]
    pub fn key(&self) -> &EventKey {
        self.registration.key()
    }

    /// Id of the forwarding handler.
    #[must_use]
    pub fn handler_id(&self) -> HandlerId {
        self.registration.id()
    }

    /// Wait for the next event.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next delivered event
    /// - `None` - The stream was closed (handler removed or bus shut down)
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take the next event without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was available
    /// - `Ok(None)` - Nothing delivered yet
    /// - `Err(StreamError::Closed)` - The stream was closed and is drained
    pub fn try_recv(&mut self) -> Result<Option<Event>, StreamError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StreamError::Closed),
        }
    }

    /// Block the current thread until the next event.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        self.receiver.blocking_recv()
    }

    /// Stop following the key; already delivered events stay readable.
    pub fn close(&mut self) {
        self.registration.dispose();
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registration.dispose();
    }
}

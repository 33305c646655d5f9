//! # Backpressure Channel
//!
//! Every Subscription owns one [`BackpressureChannel`]: an arena ring buffer
//! (fixed slot array, head index, length) behind a `parking_lot::Mutex`, plus
//! the overflow policy that decides what happens when the producer outruns
//! the consumer.
//!
//! ## Policies
//!
//! | Policy | When full |
//! |--------|-----------|
//! | `BUFFER` | slot array doubles, nothing is lost |
//! | `DROP` | the incoming (newest) event is discarded |
//! | `LATEST` | the oldest queued event is evicted for the newest |
//! | `ERROR` | the offer fails with `BackpressureExceeded` |
//! | `UNBOUNDED` | same as `BUFFER`; `MISSING` is accepted as an alias |
//!
//! Relative enqueue order is always preserved; the only reorderings are the
//! removals listed above.

use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::key::EventKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Overflow policy of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackpressureStrategy {
    /// Grow without bound; never block, never drop.
    Buffer,
    /// Discard the newest event when full.
    Drop,
    /// Evict the oldest queued event when full.
    Latest,
    /// Fail the producer when full.
    Error,
    /// Alias of `Buffer` for a single immediate consumer.
    #[serde(alias = "MISSING")]
    Unbounded,
}

impl BackpressureStrategy {
    /// Whether the policy ever rejects or removes events.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::Drop | Self::Latest | Self::Error)
    }

    /// Canonical configuration name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffer => "BUFFER",
            Self::Drop => "DROP",
            Self::Latest => "LATEST",
            Self::Error => "ERROR",
            Self::Unbounded => "UNBOUNDED",
        }
    }
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackpressureStrategy {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUFFER" => Ok(Self::Buffer),
            "DROP" => Ok(Self::Drop),
            "LATEST" => Ok(Self::Latest),
            "ERROR" => Ok(Self::Error),
            "UNBOUNDED" | "MISSING" => Ok(Self::Unbounded),
            other => Err(BusError::config(format!(
                "unknown backpressure strategy '{other}'"
            ))),
        }
    }
}

/// Fixed-slot circular buffer.
///
/// `push_back` fails when full; `push_grow` doubles the slot array first.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Allocate `capacity` empty slots (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Append at the tail, handing the item back when full.
    pub fn push_back(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Append at the tail, doubling the slot array if needed.
    pub fn push_grow(&mut self, item: T) {
        if self.is_full() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    /// Remove from the head.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    /// Drop every item, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.len;
        while self.pop_front().is_some() {}
        self.head = 0;
        count
    }

    fn grow(&mut self) {
        let new_capacity = self.slots.len() * 2;
        let len = self.len;
        let mut slots = Vec::with_capacity(new_capacity);
        while let Some(item) = self.pop_front() {
            slots.push(Some(item));
        }
        slots.resize_with(new_capacity, || None);
        self.slots = slots;
        self.head = 0;
        self.len = len;
    }
}

/// Outcome of offering an event to a channel.
#[derive(Debug)]
pub enum Offer {
    /// The event is queued for delivery.
    Enqueued,
    /// The event was discarded (DROP policy, channel full).
    Dropped,
    /// The event is queued; the returned oldest event was evicted (LATEST).
    Evicted(Event),
    /// The channel was torn down; the event was discarded.
    Closed,
}

#[derive(Debug)]
struct ChannelState {
    ring: RingBuffer<Event>,
    closed: bool,
}

/// Bounded or unbounded per-Subscription queue with an overflow policy.
#[derive(Debug)]
pub struct BackpressureChannel {
    key: EventKey,
    strategy: BackpressureStrategy,
    capacity: usize,
    state: Mutex<ChannelState>,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl BackpressureChannel {
    /// Create a channel for `key` with the given policy and capacity.
    #[must_use]
    pub fn new(key: EventKey, strategy: BackpressureStrategy, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            key,
            strategy,
            capacity,
            state: Mutex::new(ChannelState {
                ring: RingBuffer::with_capacity(capacity),
                closed: false,
            }),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Enqueue `event`, applying the overflow policy when full.
    ///
    /// Only the `ERROR` policy can fail.
    pub fn offer(&self, event: Event) -> BusResult<Offer> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(Offer::Closed);
        }
        let event = match state.ring.push_back(event) {
            Ok(()) => return Ok(Offer::Enqueued),
            Err(event) => event,
        };

        match self.strategy {
            BackpressureStrategy::Buffer | BackpressureStrategy::Unbounded => {
                state.ring.push_grow(event);
                Ok(Offer::Enqueued)
            }
            BackpressureStrategy::Drop => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(Offer::Dropped)
            }
            BackpressureStrategy::Latest => {
                let oldest = state.ring.pop_front();
                state.ring.push_grow(event);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                Ok(oldest.map_or(Offer::Enqueued, Offer::Evicted))
            }
            BackpressureStrategy::Error => Err(BusError::BackpressureExceeded {
                key: self.key.clone(),
                capacity: self.capacity,
            }),
        }
    }

    /// Take the oldest queued event.
    pub fn poll(&self) -> Option<Event> {
        self.state.lock().ring.pop_front()
    }

    /// Discard the backlog and refuse further offers.
    ///
    /// Returns the number of queued events that were never delivered.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        state.ring.clear()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().ring.is_empty()
    }

    /// Configured capacity (initial capacity for unbounded policies).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy.
    #[must_use]
    pub fn strategy(&self) -> BackpressureStrategy {
        self.strategy
    }

    /// Events discarded by the DROP policy.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events evicted by the LATEST policy.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

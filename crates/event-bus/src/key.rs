//! # Event Keys
//!
//! An [`EventKey`] names one logical event stream. Keys are either a string
//! name or a type tag derived from a Rust type, so producers that prefer typed
//! streams do not have to invent names.

use crate::error::{BusError, BusResult};
use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifier of a logical event stream.
#[derive(Debug, Clone)]
pub enum EventKey {
    /// A string-named stream.
    Named(Arc<str>),
    /// A stream tagged by a Rust type.
    Type {
        /// The type identity.
        id: TypeId,
        /// `std::any::type_name` of the type, used for display and ordering.
        name: &'static str,
    },
}

impl EventKey {
    /// Create a string-named key.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }

    /// Create a key tagged by the type `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Human-readable form of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Type { name, .. } => name,
        }
    }

    /// Reject keys that cannot name a stream.
    pub fn validate(&self) -> BusResult<()> {
        match self {
            Self::Named(name) if name.trim().is_empty() => {
                Err(BusError::invalid("event key must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl PartialEq for EventKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Named(a), Self::Named(b)) => a == b,
            (Self::Type { id: a, .. }, Self::Type { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for EventKey {}

impl Hash for EventKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Named(name) => {
                0u8.hash(state);
                name.hash(state);
            }
            Self::Type { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Named(a), Self::Named(b)) => a.cmp(b),
            (Self::Named(_), Self::Type { .. }) => Ordering::Less,
            (Self::Type { .. }, Self::Named(_)) => Ordering::Greater,
            (Self::Type { id: a, name: na }, Self::Type { id: b, name: nb }) => {
                na.cmp(nb).then_with(|| a.cmp(b))
            }
        }
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl From<&EventKey> for EventKey {
    fn from(key: &EventKey) -> Self {
        key.clone()
    }
}

//! Identifiers and the two seams the reactive system is built on.
//!
//! A [`Subscriber`] is anything a signal can push a value into. In practice
//! this is always another signal: `then` creates a one-shot signal and
//! subscribes it, so firing a subscriber is just a write into it.
//!
//! A [`Disposable`] is anything a context can own and tear down.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a signal.
///
/// Signal ids key the staleness cache of every context, so two handles
/// refer to the same cell exactly when their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    /// Generate a new unique signal ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signal#{}", self.0)
    }
}

/// Unique identifier for an ownership context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate a new unique context ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// A receiver of values written into a signal.
///
/// Subscribers are held by their source until it fires, then dropped from
/// the source's list before being notified.
pub trait Subscriber<T> {
    /// Identity used by `unsubscribe`.
    fn id(&self) -> SignalId;

    /// Deliver a freshly written value.
    fn notify(&self, value: T);
}

/// A node owned by a context.
///
/// The default implementation does nothing, so nodes without any teardown
/// can still be registered.
pub trait Disposable {
    fn dispose(&self) {}
}

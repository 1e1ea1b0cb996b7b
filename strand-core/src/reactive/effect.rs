//! Effect Implementation
//!
//! An Effect runs a callback exactly once, inside a fresh context, and owns
//! everything that callback creates.
//!
//! # How Effects Work
//!
//! 1. A result signal is created first, while the *outer* context is still
//!    active, so the effect itself is a child of whoever created it.
//!
//! 2. A new context is entered and the callback runs synchronously with the
//!    result signal. Signals, subscriptions, effects and loops created by the
//!    callback register with that context.
//!
//! 3. The callback may return a [`Cleanup`], kept until cancellation.
//!
//! Effects never re-run. Re-evaluating on change is a pattern composed from
//! loops, not something the effect does by itself.
//!
//! # Cleanup
//!
//! Cancelling the result signal runs the cleanup once, disposes the effect's
//! context (cascading into nested effects and loops), then drops any
//! pending subscriptions on the result signal. A panicking cleanup is
//! reported and does not stop the context from being disposed.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::context::Context;
use super::runtime::Runtime;
use super::signal::Signal;
use crate::error::{panic_message, ReactiveError};

/// Teardown returned by an effect callback.
///
/// `()` converts into "no cleanup", so callbacks without teardown can just
/// return nothing.
#[derive(Default)]
pub struct Cleanup(Option<Box<dyn FnOnce()>>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl From<()> for Cleanup {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Cleanup").field(&self.0.is_some()).finish()
    }
}

/// A one-shot side-effecting computation.
///
/// # Example
///
/// ```rust
/// use std::{cell::Cell, rc::Rc};
/// use strand_core::reactive::{Cleanup, Effect};
///
/// let disposed = Rc::new(Cell::new(false));
///
/// let flag = disposed.clone();
/// let effect = Effect::new(move |sig| {
///     sig.set(1);
///     Cleanup::new(move || flag.set(true))
/// });
///
/// assert_eq!(effect.get(), Some(1));
/// effect.cancel();
/// assert!(disposed.get());
/// ```
pub struct Effect<T> {
    signal: Signal<T>,
    context: Context,
    cancelled: Rc<Cell<bool>>,
}

impl<T> Effect<T>
where
    T: Clone + 'static,
{
    /// Create the effect and run `callback` immediately.
    pub fn new<F, R>(callback: F) -> Self
    where
        F: FnOnce(&Signal<T>) -> R,
        R: Into<Cleanup>,
    {
        let signal = Signal::<T>::empty();
        let context = Context::new();
        let cancelled = Rc::new(Cell::new(false));

        let cleanup: Cleanup = context.run(|| callback(&signal)).into();

        let teardown_context = context.clone();
        let flag = cancelled.clone();
        let id = signal.id();
        signal.set_teardown(move || {
            flag.set(true);
            tracing::debug!(signal = %id, context = %teardown_context.id(), "cancelling effect");

            if let Some(cleanup) = cleanup.0 {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                    Runtime::report(ReactiveError::CleanupPanicked {
                        context: teardown_context.id(),
                        message: panic_message(&*payload),
                    });
                }
            }

            teardown_context.release();
        });

        Self {
            signal,
            context,
            cancelled,
        }
    }

    /// The result signal, which is also the effect's cancellable handle.
    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }

    pub fn into_signal(self) -> Signal<T> {
        self.signal
    }

    /// The context the callback ran in.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Current value of the result signal.
    pub fn get(&self) -> Option<T> {
        self.signal.get()
    }

    /// Run the cleanup and dispose everything the effect created.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            context: self.context.clone(),
            cancelled: Rc::clone(&self.cancelled),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("signal", &self.signal)
            .field("context", &self.context)
            .field("cancelled", &self.cancelled.get())
            .finish()
    }
}

/// Create an effect and return its result signal.
pub fn create_effect<T, F, R>(callback: F) -> Signal<T>
where
    T: Clone + 'static,
    F: FnOnce(&Signal<T>) -> R,
    R: Into<Cleanup>,
{
    Effect::new(callback).into_signal()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

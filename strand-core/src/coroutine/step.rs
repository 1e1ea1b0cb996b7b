//! The coroutine interface driven by loops.
//!
//! A coroutine is resumed with the value its last awaitable resolved to
//! (`None` on the first step) and answers with a [`Step`]: either it yields
//! something to wait on, or it completes.

use std::marker::PhantomData;

use super::awaitable::Awaitable;
use crate::error::BoxError;

/// Outcome of resuming a coroutine.
pub enum Step<I, O> {
    /// Suspend on an awaitable; its value is passed to the next resume.
    Yield(Awaitable<I>),

    /// Finish this coroutine instance.
    ///
    /// `Some(value)` completes the loop with `value`. `None` asks the loop to
    /// start over with a fresh instance from its factory.
    Complete(Option<O>),
}

impl<I, O> Step<I, O> {
    /// Yield `awaitable`.
    pub fn wait(awaitable: impl Into<Awaitable<I>>) -> Self {
        Self::Yield(awaitable.into())
    }

    /// Complete the loop with `value`.
    pub fn done(value: O) -> Self {
        Self::Complete(Some(value))
    }

    /// Complete this instance without a value, restarting the loop.
    pub fn restart() -> Self {
        Self::Complete(None)
    }
}

impl<I, O> std::fmt::Debug for Step<I, O>
where
    I: std::fmt::Debug,
    O: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yield(awaitable) => f.debug_tuple("Yield").field(awaitable).finish(),
            Self::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
        }
    }
}

/// A resumable computation.
pub trait Coroutine {
    /// Values the coroutine waits for.
    type Input;

    /// Value the coroutine completes with.
    type Output;

    /// Advance to the next suspension point.
    ///
    /// An `Err` terminates the loop driving this coroutine.
    fn resume(&mut self, input: Option<Self::Input>) -> Result<Step<Self::Input, Self::Output>, BoxError>;
}

/// Coroutine backed by a closure. See [`from_fn`].
pub struct FnCoroutine<F, I, O> {
    step: F,
    _marker: PhantomData<fn(Option<I>) -> O>,
}

impl<F, I, O> Coroutine for FnCoroutine<F, I, O>
where
    F: FnMut(Option<I>) -> Result<Step<I, O>, BoxError>,
{
    type Input = I;
    type Output = O;

    fn resume(&mut self, input: Option<I>) -> Result<Step<I, O>, BoxError> {
        (self.step)(input)
    }
}

/// Build a coroutine from a step closure.
///
/// The closure is its own state machine: it keeps whatever it needs to know
/// which suspension point it is resuming from.
///
/// ```rust
/// use strand_core::coroutine::{from_fn, Coroutine, Step};
///
/// let mut stage = 0;
/// let mut counter = from_fn(move |_input: Option<()>| {
///     stage += 1;
///     Ok(if stage < 3 { Step::restart() } else { Step::done(stage) })
/// });
///
/// assert!(matches!(counter.resume(None), Ok(Step::Complete(None))));
/// assert!(matches!(counter.resume(None), Ok(Step::Complete(None))));
/// assert!(matches!(counter.resume(None), Ok(Step::Complete(Some(3)))));
/// ```
pub fn from_fn<I, O, F>(step: F) -> FnCoroutine<F, I, O>
where
    F: FnMut(Option<I>) -> Result<Step<I, O>, BoxError>,
{
    FnCoroutine {
        step,
        _marker: PhantomData,
    }
}

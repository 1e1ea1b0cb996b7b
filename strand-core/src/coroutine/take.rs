//! Staleness-aware observation.
//!
//! A loop resuming at tick N has to tell "the source changed before I
//! looked" apart from "the source changes after I look". Plain `yield
//! signal` only ever sees the *next* write, so a change that happened while
//! the loop was waiting on something else would be missed.
//!
//! Every context keeps a cache of the signal ages it has acknowledged.
//! [`read`] acknowledges the current age explicitly. [`take`] resolves
//! immediately when the signal has moved past the acknowledged age, unless
//! the active context made that write itself, and otherwise waits for the
//! next write.
//!
//! A signal the context has never acknowledged counts as acknowledged at
//! age 0, so any value written before the first `take` is picked up. Writes
//! made outside of every context have no author and always count as
//! external changes.

use super::awaitable::Awaitable;
use crate::error::{ReactiveError, Result};
use crate::reactive::{Context, Signal};

fn active_context(operation: &'static str) -> Result<Context> {
    Context::current().ok_or(ReactiveError::NoActiveContext { operation })
}

/// Read `signal` and acknowledge its current age in the active context.
pub fn read<T, I>(signal: &Signal<T, I>) -> Result<Option<T>>
where
    T: Clone + 'static,
    I: 'static,
{
    let context = active_context("read")?;
    context.acknowledge(signal.id(), signal.age());
    Ok(signal.get())
}

/// Wait for a change of `signal` the active context has not seen yet.
pub fn take<T, I>(signal: &Signal<T, I>) -> Result<Awaitable<T>>
where
    T: Clone + 'static,
    I: 'static,
{
    let context = active_context("take")?;
    let id = signal.id();
    let acknowledged = context.cached_age(id).unwrap_or(0);

    if signal.age() > acknowledged && signal.author() != Some(context.id()) {
        if let Some(value) = signal.get() {
            tracing::trace!(signal = %id, context = %context.id(), age = signal.age(), "take resolved immediately");
            context.acknowledge(id, signal.age());
            return Ok(Awaitable::Ready(value));
        }
    }

    // Weak on both ends: the one-shot is a child of `context`.
    let owner = context.downgrade();
    let source = signal.downgrade();
    let next = signal.then(move |value| {
        if let (Some(owner), Some(source)) = (owner.upgrade(), source.upgrade()) {
            owner.acknowledge(id, source.age());
        }
        value
    });

    Ok(next.awaitable())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_take_require_context() {
        let signal = Signal::new(1);

        assert!(matches!(
            read(&signal),
            Err(ReactiveError::NoActiveContext { operation: "read" })
        ));
        assert!(matches!(
            take(&signal),
            Err(ReactiveError::NoActiveContext { operation: "take" })
        ));
    }

    #[test]
    fn read_acknowledges_age() {
        let signal = Signal::new(1);
        signal.set(2);
        let context = Context::new();

        let value = context.run(|| read(&signal)).unwrap();

        assert_eq!(value, Some(2));
        assert_eq!(context.cached_age(signal.id()), Some(2));
    }

    #[test]
    fn take_resolves_immediately_on_unseen_change() {
        let signal = Signal::new(1);
        let context = Context::new();

        let awaitable = context.run(|| take(&signal)).unwrap();

        assert!(matches!(awaitable, Awaitable::Ready(1)));
        assert_eq!(context.cached_age(signal.id()), Some(1));
    }

    #[test]
    fn take_waits_when_already_acknowledged() {
        let signal = Signal::new(1);
        let context = Context::new();

        context.run(|| read(&signal)).unwrap();
        let awaitable = context.run(|| take(&signal)).unwrap();

        assert!(!awaitable.is_ready());

        // Firing the subscription advances the cache.
        signal.set(2);
        assert_eq!(context.cached_age(signal.id()), Some(2));
    }

    #[test]
    fn take_on_empty_signal_waits() {
        let signal = Signal::<i32>::empty();
        let context = Context::new();

        let awaitable = context.run(|| take(&signal)).unwrap();
        assert!(!awaitable.is_ready());
    }

    #[test]
    fn take_ignores_own_writes() {
        let signal = Signal::new(1);
        let context = Context::new();

        let awaitable = context.run(|| {
            read(&signal).unwrap();
            signal.set(2);
            take(&signal).unwrap()
        });

        assert!(!awaitable.is_ready());
        assert_eq!(context.cached_age(signal.id()), Some(1));
    }

    #[test]
    fn take_sees_writes_from_other_contexts() {
        let signal = Signal::new(1);
        let context = Context::new();
        let other = Context::new();

        context.run(|| read(&signal)).unwrap();
        other.run(|| signal.set(2));

        let awaitable = context.run(|| take(&signal)).unwrap();
        assert!(matches!(awaitable, Awaitable::Ready(2)));
    }

    #[test]
    fn take_sees_writes_without_author() {
        let signal = Signal::new(1);
        let context = Context::new();

        context.run(|| read(&signal)).unwrap();
        signal.set(2);
        assert_eq!(signal.author(), None);

        let awaitable = context.run(|| take(&signal)).unwrap();
        assert!(matches!(awaitable, Awaitable::Ready(2)));
    }
}

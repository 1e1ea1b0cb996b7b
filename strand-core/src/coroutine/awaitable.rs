//! Awaitables
//!
//! A coroutine suspends by yielding an [`Awaitable`]. It is either a value
//! that is already available, or something exposing a one-shot subscribe
//! operation (a [`Thenable`]). Every signal is a thenable, which is how loops
//! wait on signals, effects, and other loops alike.

use std::rc::Rc;

use crate::reactive::{Disposable, Signal};

/// Anything a loop can wait on.
pub trait Thenable<T> {
    /// Call `on_resolve` with the next value, at most once.
    ///
    /// The returned handle cancels the subscription when disposed. It is
    /// also registered with the active context, so disposing that context
    /// cancels the wait.
    fn subscribe(&self, on_resolve: Box<dyn FnOnce(T)>) -> Rc<dyn Disposable>;
}

impl<T, I> Thenable<T> for Signal<T, I>
where
    T: Clone + 'static,
    I: 'static,
{
    fn subscribe(&self, on_resolve: Box<dyn FnOnce(T)>) -> Rc<dyn Disposable> {
        let mut pending = Some(on_resolve);
        let subscription = self.then(move |value| {
            if let Some(on_resolve) = pending.take() {
                on_resolve(value);
            }
        });
        subscription.as_disposable()
    }
}

/// What a coroutine yields.
pub enum Awaitable<T> {
    /// Suspend until the thenable resolves.
    Pending(Rc<dyn Thenable<T>>),

    /// Resume right away with this value.
    Ready(T),
}

impl<T> Awaitable<T> {
    pub fn ready(value: T) -> Self {
        Self::Ready(value)
    }

    pub fn pending(thenable: impl Thenable<T> + 'static) -> Self {
        Self::Pending(Rc::new(thenable))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl<T, I> Signal<T, I>
where
    T: Clone + 'static,
    I: 'static,
{
    /// Wait for this signal's next write.
    pub fn awaitable(&self) -> Awaitable<T> {
        Awaitable::pending(self.clone())
    }
}

impl<T, I> From<Signal<T, I>> for Awaitable<T>
where
    T: Clone + 'static,
    I: 'static,
{
    fn from(signal: Signal<T, I>) -> Self {
        Awaitable::pending(signal)
    }
}

impl<T, I> From<&Signal<T, I>> for Awaitable<T>
where
    T: Clone + 'static,
    I: 'static,
{
    fn from(signal: &Signal<T, I>) -> Self {
        signal.awaitable()
    }
}

impl<T> std::fmt::Debug for Awaitable<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending(_) => f.write_str("Awaitable::Pending"),
            Self::Ready(value) => f.debug_tuple("Awaitable::Ready").field(value).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn signal_subscription_resolves_once() {
        let signal = Signal::new(0);
        let seen = Rc::new(Cell::new(0));

        let sink = seen.clone();
        let Awaitable::Pending(thenable) = signal.awaitable() else {
            panic!("signals are never ready");
        };
        let _handle = thenable.subscribe(Box::new(move |v| sink.set(v)));

        signal.set(7);
        signal.set(8);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn disposing_subscription_handle_cancels_it() {
        let signal = Signal::new(0);
        let seen = Rc::new(Cell::new(0));

        let sink = seen.clone();
        let handle = signal.subscribe(Box::new(move |v| sink.set(v)));
        assert_eq!(signal.subscriber_count(), 1);

        handle.dispose();
        signal.set(3);

        assert_eq!(seen.get(), 0);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn ready_is_ready() {
        assert!(Awaitable::ready(1).is_ready());
        assert!(!Awaitable::from(&Signal::new(1)).is_ready());
    }
}

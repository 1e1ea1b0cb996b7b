//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: a cell holding an optional
//! value, plus an ordered list of one-shot subscribers waiting for the next
//! write.
//!
//! # How Signals Work
//!
//! 1. `then` creates a new signal wrapping a callback and appends it to the
//!    subscriber list. The new signal is a child of the active context, so it
//!    is cancelled together with the scope that created it.
//!
//! 2. `set` stores the value, bumps the age, records the active context as
//!    the author, then snapshots and clears the subscriber list before
//!    writing the value into each former subscriber in order.
//!
//! 3. Because firing a subscriber is a write into it, chained `then`s cascade
//!    synchronously and depth-first before `set` returns.
//!
//! # Reducer Cells
//!
//! A `Signal<T, I>` accepts writes of type `I` and stores values of type `T`.
//! Plain cells use `I = T` and store the input as is; cells built with
//! [`Signal::reducer`] run every input through a producer first. One-shot
//! subscribers are reducer cells whose producer is the `then` callback.
//!
//! # Memory Layout
//!
//! Each signal is one `Rc` allocation holding:
//! - A unique ID and the age/author bookkeeping (a few words)
//! - The value (`Option<T>`)
//! - The subscriber list (inline up to two entries)

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::Context;
use super::runtime::Runtime;
use super::subscriber::{ContextId, Disposable, SignalId, Subscriber};

enum Producer<I, T> {
    /// Plain cell: the input is stored as is.
    Identity(fn(I) -> T),

    /// Reducer cell. The closure is moved out while it runs so it may read
    /// (or subscribe to) its own signal.
    Reducer(RefCell<Option<ReducerFn<I, T>>>),
}

type ReducerFn<I, T> = Box<dyn FnMut(I) -> T>;

/// Puts a reducer back into its slot when dropped, also while unwinding.
struct RestoreProducer<'a, I, T> {
    slot: &'a RefCell<Option<ReducerFn<I, T>>>,
    producer: Option<ReducerFn<I, T>>,
}

impl<I, T> Drop for RestoreProducer<'_, I, T> {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            *self.slot.borrow_mut() = Some(producer);
        }
    }
}

type Subscribers<T> = SmallVec<[Rc<dyn Subscriber<T>>; 2]>;

pub(crate) struct SignalInner<T, I> {
    id: SignalId,
    value: RefCell<Option<T>>,
    producer: Producer<I, T>,
    subscribers: RefCell<Subscribers<T>>,
    age: Cell<u64>,
    author: Cell<Option<ContextId>>,
    disposed: Cell<bool>,
    teardown: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// A reactive cell holding a value of type `T`, written with inputs of type `I`.
///
/// # Example
///
/// ```rust
/// use std::{cell::Cell, rc::Rc};
/// use strand_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let sink = seen.clone();
/// count.then(move |v| sink.set(v));
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
///
/// // One-shot: the subscription is gone after the first write
/// count.set(6);
/// assert_eq!(seen.get(), 5);
/// assert_eq!(count.get(), Some(6));
/// ```
pub struct Signal<T, I = T> {
    pub(crate) inner: Rc<SignalInner<T, I>>,
}

impl<T> Signal<T, T>
where
    T: Clone + 'static,
{
    /// Create a signal holding `value`. Its age starts at 1.
    pub fn new(value: T) -> Self {
        Self::build(Some(value), Producer::Identity(identity::<T>))
    }

    /// Create a signal with no value yet. Its age starts at 0.
    pub fn empty() -> Self {
        Self::build(None, Producer::Identity(identity::<T>))
    }
}

fn identity<T>(value: T) -> T {
    value
}

impl<T, I> Signal<T, I>
where
    T: Clone + 'static,
    I: 'static,
{
    /// Create a reducer cell: every write stores `producer(input)`.
    pub fn reducer<F>(producer: F) -> Self
    where
        F: FnMut(I) -> T + 'static,
    {
        Self::build(None, Producer::Reducer(RefCell::new(Some(Box::new(producer)))))
    }

    fn build(value: Option<T>, producer: Producer<I, T>) -> Self {
        let age = u64::from(value.is_some());
        let signal = Self {
            inner: Rc::new(SignalInner {
                id: SignalId::new(),
                value: RefCell::new(value),
                producer,
                subscribers: RefCell::new(SmallVec::new()),
                age: Cell::new(age),
                author: Cell::new(None),
                disposed: Cell::new(false),
                teardown: RefCell::new(None),
            }),
        };

        Context::register_child(signal.inner.clone());
        signal
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// This never records anything in a context; use
    /// [`read`](crate::coroutine::read) for an acknowledged read.
    pub fn get(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.inner.value.borrow().as_ref())
    }

    /// Write a value and fire every pending subscriber.
    pub fn set(&self, input: I) {
        self.inner.write(input);
    }

    /// Build a derived setter that maps its input through `f` before
    /// writing. Useful for adapting event payloads.
    pub fn setter<A, F>(&self, mut f: F) -> impl FnMut(A) + 'static
    where
        A: 'static,
        F: FnMut(A) -> I + 'static,
    {
        let signal = self.clone();
        move |input| signal.set(f(input))
    }

    /// Subscribe once to the next write.
    ///
    /// Returns the subscription, itself a signal holding `on_resolve`'s
    /// result, so it can be chained with another `then` or cancelled.
    pub fn then<U, F>(&self, on_resolve: F) -> Signal<U, T>
    where
        U: Clone + 'static,
        F: FnMut(T) -> U + 'static,
    {
        let next = Signal::<U, T>::reducer(on_resolve);

        if self.inner.disposed.get() {
            Runtime::diagnose_disposed(self.id(), "then");
            return next;
        }

        let source = Rc::downgrade(&self.inner);
        let id = next.id();
        next.inner.set_teardown(move || {
            if let Some(source) = Weak::upgrade(&source) {
                source.remove_subscriber(id);
            }
        });

        self.inner.subscribers.borrow_mut().push(next.inner.clone());
        next
    }

    /// Remove a single pending subscription. Returns whether it was pending.
    pub fn unsubscribe<U>(&self, subscriber: &Signal<U, T>) -> bool {
        self.inner.remove_subscriber(subscriber.inner.id)
    }

    /// Drop every pending subscription.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Dispose this handle.
    ///
    /// A one-shot detaches from its source, an effect runs its cleanup and
    /// disposes its context, a loop stops ticking. Every pending
    /// subscription is dropped and later writes are ignored. Cancelling
    /// twice does nothing.
    pub fn cancel(&self) {
        self.inner.dispose_handle();
    }

    /// Number of writes that produced a value so far.
    pub fn age(&self) -> u64 {
        self.inner.age.get()
    }

    /// The context that was active during the last write.
    pub fn author(&self) -> Option<ContextId> {
        self.inner.author.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of pending subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub(crate) fn downgrade(&self) -> Weak<SignalInner<T, I>> {
        Rc::downgrade(&self.inner)
    }

    /// Type-erased handle for ownership bookkeeping.
    pub(crate) fn as_disposable(&self) -> Rc<dyn Disposable> {
        self.inner.clone()
    }

    pub(crate) fn set_teardown(&self, teardown: impl FnOnce() + 'static) {
        self.inner.set_teardown(teardown);
    }
}

impl<T, I> SignalInner<T, I>
where
    T: Clone + 'static,
    I: 'static,
{
    fn produce(&self, input: I) -> Option<T> {
        match &self.producer {
            Producer::Identity(f) => Some(f(input)),
            Producer::Reducer(slot) => {
                let mut restore = RestoreProducer {
                    slot,
                    producer: slot.borrow_mut().take(),
                };
                let producer = restore.producer.as_mut()?;
                Some(producer(input))
            }
        }
    }

    pub(crate) fn write(&self, input: I) {
        if self.disposed.get() {
            Runtime::diagnose_disposed(self.id, "set");
            return;
        }

        let Some(value) = self.produce(input) else {
            tracing::warn!(signal = %self.id, "reentrant write from inside its own producer dropped");
            return;
        };

        *self.value.borrow_mut() = Some(value.clone());
        self.age.set(self.age.get() + 1);
        self.author.set(Context::current_id());

        // Snapshot and clear first: subscribers may write back into us.
        let subscribers = std::mem::take(&mut *self.subscribers.borrow_mut());
        for subscriber in subscribers {
            subscriber.notify(value.clone());
        }
    }

    pub(crate) fn age(&self) -> u64 {
        self.age.get()
    }

    fn remove_subscriber(&self, id: SignalId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|s| s.id() != id);
        subscribers.len() != before
    }

    fn abort(&self) {
        // Drop outside the borrow: a subscriber's destructor may touch us.
        let dropped = std::mem::take(&mut *self.subscribers.borrow_mut());
        drop(dropped);
    }

    fn set_teardown(&self, teardown: impl FnOnce() + 'static) {
        if self.disposed.get() {
            teardown();
            return;
        }
        *self.teardown.borrow_mut() = Some(Box::new(teardown));
    }

    fn dispose_handle(&self) {
        if self.disposed.replace(true) {
            return;
        }

        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
        self.abort();
    }
}

impl<T, I> Subscriber<I> for SignalInner<T, I>
where
    T: Clone + 'static,
    I: 'static,
{
    fn id(&self) -> SignalId {
        self.id
    }

    fn notify(&self, value: I) {
        self.write(value);
    }
}

impl<T, I> Disposable for SignalInner<T, I>
where
    T: Clone + 'static,
    I: 'static,
{
    fn dispose(&self) {
        self.dispose_handle();
    }
}

impl<T, I> Clone for Signal<T, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, I> PartialEq for Signal<T, I> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, I> Eq for Signal<T, I> {}

impl<T, I> Debug for Signal<T, I>
where
    T: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("age", &self.inner.age.get())
            .field("subscriber_count", &self.inner.subscribers.borrow().len())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

/// Create a signal holding `value`.
pub fn create_signal<T: Clone + 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Loop Scheduler
//!
//! A loop drives a [`Coroutine`], re-entering the same context on every tick
//! and suspending whenever the coroutine yields something to wait on.
//!
//! # Algorithm
//!
//! Each tick:
//!
//! 1. Dispose every child the previous tick created. No subscription,
//!    effect or nested loop outlives the iteration that made it.
//! 2. If there is no coroutine instance (first tick, or after a restart),
//!    build one from the factory. The factory runs in a scope of its own
//!    that lives as long as the instance, so state it creates survives the
//!    per-tick drain and is disposed on restart or cancel.
//! 3. Re-enter the loop's context and resume the coroutine with the value
//!    the last awaitable resolved to.
//! 4. Act on the step:
//!    - `Complete(Some(v))`: write `v` into the loop's signal. Done.
//!    - `Complete(None)`: drop the instance and tick again (restart).
//!    - `Yield(Ready(v))`: tick again with `v`.
//!    - `Yield(Pending(t))`: subscribe to `t` from inside the context and
//!      suspend. The subscription's firing starts the next tick.
//!
//! Steps 1-4 repeat synchronously until the loop suspends or finishes. A
//! loop that keeps going past `max_sync_steps` ticks without suspending is
//! faulted, as is a loop whose coroutine returns an error or panics.
//!
//! # Ownership
//!
//! A suspended loop is kept alive by the subscription it waits on (source
//! signal -> one-shot -> resume closure -> driver). That chain is broken at
//! the start of every tick and on cancellation, so a loop nobody can resume
//! anymore is freed.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::awaitable::{Awaitable, Thenable};
use super::step::{Coroutine, Step};
use crate::error::{panic_message, ReactiveError};
use crate::reactive::{Context, Disposable, Runtime, Signal, SignalId};

/// Lifecycle of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// A tick is executing.
    Running,

    /// Waiting for an awaitable to resolve.
    Suspended,

    /// Finished with a value, now held by the loop's signal.
    Completed,

    /// Cancelled through its handle or its owning context.
    Cancelled,

    /// Terminated by a coroutine error, panic, or runaway ticking.
    Faulted,
}

impl LoopState {
    /// Whether the loop will never tick again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Faulted)
    }
}

/// State shared between the driver, the cancel hook and [`Loop`] handles.
struct LoopMeta {
    state: Cell<LoopState>,
    tick: Cell<u64>,
    generation: Cell<u64>,
    awaiting: RefCell<Option<Rc<dyn Disposable>>>,
    instance: RefCell<Option<Context>>,
}

impl LoopMeta {
    fn cancel_wait(&self) {
        let awaiting = self.awaiting.borrow_mut().take();
        if let Some(awaiting) = awaiting {
            awaiting.dispose();
        }
    }

    /// Dispose whatever the current coroutine instance's factory created.
    fn release_instance(&self) {
        let instance = self.instance.borrow_mut().take();
        if let Some(instance) = instance {
            instance.release();
        }
    }
}

struct Driver<C: Coroutine, F> {
    factory: RefCell<F>,
    coroutine: RefCell<Option<C>>,
    context: Context,
    output: Signal<C::Output>,
    meta: Rc<LoopMeta>,
}

impl<C, F> Driver<C, F>
where
    C: Coroutine + 'static,
    C::Input: 'static,
    C::Output: Clone + 'static,
    F: FnMut() -> C + 'static,
{
    fn id(&self) -> SignalId {
        self.output.id()
    }

    /// Run ticks until the loop suspends or stops.
    fn advance(self: &Rc<Self>, mut input: Option<C::Input>) {
        let max_steps = Runtime::config().max_sync_steps;
        let mut steps = 0usize;

        loop {
            if self.meta.state.get().is_terminal() {
                return;
            }

            steps += 1;
            if steps > max_steps {
                self.fault(ReactiveError::StepLimitExceeded {
                    signal: self.id(),
                    steps: max_steps,
                });
                return;
            }

            self.meta.cancel_wait();
            self.context.dispose_all();

            // Ticks never overlap: every suspension hands out exactly one
            // resume callback, and it is consumed to start the next tick.
            let mut slot = self.coroutine.borrow_mut();
            let coroutine = slot.get_or_insert_with(|| {
                self.meta.tick.set(0);
                self.meta.generation.set(self.meta.generation.get() + 1);

                let instance = Context::new();
                *self.meta.instance.borrow_mut() = Some(instance.clone());
                instance.run(|| (self.factory.borrow_mut())())
            });

            let tick = self.meta.tick.get() + 1;
            self.meta.tick.set(tick);
            self.meta.state.set(LoopState::Running);

            let outcome = {
                let _guard = self.context.enter();
                panic::catch_unwind(AssertUnwindSafe(|| coroutine.resume(input.take())))
            };

            let step = match outcome {
                Ok(Ok(step)) => step,
                Ok(Err(source)) => {
                    drop(slot);
                    self.fault(ReactiveError::Coroutine {
                        signal: self.id(),
                        tick,
                        source,
                    });
                    return;
                }
                Err(payload) => {
                    drop(slot);
                    self.fault(ReactiveError::CoroutinePanicked {
                        signal: self.id(),
                        tick,
                        message: panic_message(&*payload),
                    });
                    return;
                }
            };

            // Cancelled from inside its own tick.
            if self.meta.state.get().is_terminal() {
                return;
            }

            match step {
                Step::Complete(Some(value)) => {
                    drop(slot);
                    self.meta.state.set(LoopState::Completed);
                    tracing::debug!(signal = %self.id(), tick, "loop completed");
                    self.context.run(|| self.output.set(value));
                    return;
                }
                Step::Complete(None) => {
                    *slot = None;
                    drop(slot);
                    self.meta.release_instance();
                    tracing::debug!(
                        signal = %self.id(),
                        generation = self.meta.generation.get(),
                        "loop restarting"
                    );
                }
                Step::Yield(Awaitable::Ready(value)) => {
                    input = Some(value);
                }
                Step::Yield(Awaitable::Pending(thenable)) => {
                    drop(slot);
                    self.suspend(thenable.as_ref(), tick);
                    return;
                }
            }
        }
    }

    fn suspend(self: &Rc<Self>, thenable: &dyn Thenable<C::Input>, tick: u64) {
        self.meta.state.set(LoopState::Suspended);

        let driver = Rc::clone(self);
        let handle = self.context.run(|| {
            thenable.subscribe(Box::new(move |value: C::Input| driver.advance(Some(value))))
        });

        // A thenable may resolve synchronously while subscribing, in which
        // case the wait is already over.
        if self.meta.state.get() == LoopState::Suspended && self.meta.tick.get() == tick {
            *self.meta.awaiting.borrow_mut() = Some(handle);
        }
    }

    fn fault(&self, error: ReactiveError) {
        self.meta.state.set(LoopState::Faulted);
        self.meta.cancel_wait();
        self.context.dispose_all();
        self.meta.release_instance();
        Runtime::report(error);
    }
}

/// Handle to a running loop.
///
/// The loop's [`signal`](Loop::signal) receives the completion value and is
/// what other loops wait on; cancelling either stops the loop.
pub struct Loop<O> {
    signal: Signal<O>,
    meta: Rc<LoopMeta>,
}

impl<O> Loop<O>
where
    O: Clone + 'static,
{
    /// Start a loop and run its first tick immediately.
    ///
    /// `factory` builds a fresh coroutine for the first tick and after
    /// every restart.
    pub fn spawn<C, F>(factory: F) -> Self
    where
        C: Coroutine<Output = O> + 'static,
        C::Input: 'static,
        F: FnMut() -> C + 'static,
    {
        let output = Signal::<O>::empty();
        let context = Context::new();
        let meta = Rc::new(LoopMeta {
            state: Cell::new(LoopState::Running),
            tick: Cell::new(0),
            generation: Cell::new(0),
            awaiting: RefCell::new(None),
            instance: RefCell::new(None),
        });

        let cancel_meta = meta.clone();
        let cancel_context = context.clone();
        let id = output.id();
        output.set_teardown(move || {
            if !cancel_meta.state.get().is_terminal() {
                cancel_meta.state.set(LoopState::Cancelled);
            }
            tracing::debug!(signal = %id, "cancelling loop");
            cancel_meta.cancel_wait();
            cancel_context.release();
            cancel_meta.release_instance();
        });

        let driver = Rc::new(Driver {
            factory: RefCell::new(factory),
            coroutine: RefCell::new(None),
            context,
            output: output.clone(),
            meta: meta.clone(),
        });
        driver.advance(None);

        Self {
            signal: output,
            meta,
        }
    }

    pub fn signal(&self) -> &Signal<O> {
        &self.signal
    }

    pub fn into_signal(self) -> Signal<O> {
        self.signal
    }

    /// Completion value, `None` until the loop completes.
    pub fn get(&self) -> Option<O> {
        self.signal.get()
    }

    pub fn state(&self) -> LoopState {
        self.meta.state.get()
    }

    /// Ticks run by the current coroutine instance.
    pub fn tick(&self) -> u64 {
        self.meta.tick.get()
    }

    /// Number of coroutine instances built so far.
    pub fn generation(&self) -> u64 {
        self.meta.generation.get()
    }

    pub fn cancel(&self) {
        self.signal.cancel();
    }
}

impl<O> Clone for Loop<O> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            meta: Rc::clone(&self.meta),
        }
    }
}

impl<O: std::fmt::Debug> std::fmt::Debug for Loop<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("signal", &self.signal)
            .field("state", &self.meta.state.get())
            .field("tick", &self.meta.tick.get())
            .field("generation", &self.meta.generation.get())
            .finish()
    }
}

impl<O> From<&Loop<O>> for Awaitable<O>
where
    O: Clone + 'static,
{
    fn from(handle: &Loop<O>) -> Self {
        handle.signal.awaitable()
    }
}

/// Start a loop and return its signal.
pub fn create_loop<C, F>(factory: F) -> Signal<C::Output>
where
    C: Coroutine + 'static,
    C::Input: 'static,
    C::Output: Clone + 'static,
    F: FnMut() -> C + 'static,
{
    Loop::spawn(factory).into_signal()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::from_fn;
    use crate::error::BoxError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Collect errors reported for one loop.
    fn collect_errors(signal: SignalId) -> (Arc<Mutex<Vec<String>>>, crate::reactive::ErrorHandlerId) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = Runtime::on_error(move |error| {
            if error.signal() == Some(signal) {
                sink.lock().push(error.to_string());
            }
        });
        (seen, id)
    }

    /// Spawn a loop that waits on `source` once per iteration, then restarts.
    fn spawn_wait_then_restart(source: &Signal<i32>, seen: &Rc<RefCell<Vec<i32>>>) -> Loop<()> {
        let (source, seen) = (source.clone(), seen.clone());
        Loop::spawn(move || {
            let source = source.clone();
            let seen = seen.clone();
            from_fn(move |input: Option<i32>| match input {
                None => Ok(Step::wait(&source)),
                Some(v) => {
                    seen.borrow_mut().push(v);
                    Ok(Step::restart())
                }
            })
        })
    }

    #[test]
    fn loop_resumes_once_per_write_and_completes() {
        let sig = Signal::<()>::empty();
        let result = Rc::new(Cell::new(0));

        let (source, counter) = (sig.clone(), result.clone());
        let main = Loop::spawn(move || {
            let source = source.clone();
            let counter = counter.clone();
            from_fn(move |input: Option<()>| {
                if input.is_none() {
                    return Ok(Step::wait(&source));
                }
                counter.set(counter.get() + 1);
                Ok(if counter.get() == 3 {
                    Step::done("final")
                } else {
                    Step::restart()
                })
            })
        });

        assert_eq!(result.get(), 0);
        assert_eq!(main.state(), LoopState::Suspended);

        sig.set(());
        assert_eq!(result.get(), 1);

        sig.set(());
        assert_eq!(result.get(), 2);
        assert_eq!(main.get(), None);

        sig.set(());
        assert_eq!(result.get(), 3);
        assert_eq!(main.get(), Some("final"));
        assert_eq!(main.state(), LoopState::Completed);
        assert_eq!(main.generation(), 3);

        // No further ticks after completion
        sig.set(());
        assert_eq!(result.get(), 3);
        assert_eq!(sig.subscriber_count(), 0);
    }

    #[test]
    fn restart_disposes_previous_iteration() {
        let trigger = Signal::new(0);
        let side = Signal::new(0);
        let fired = Rc::new(RefCell::new(Vec::new()));

        let (trigger_src, side_src, log) = (trigger.clone(), side.clone(), fired.clone());
        let handle = Loop::spawn(move || {
            let trigger = trigger_src.clone();
            let side = side_src.clone();
            let log = log.clone();
            from_fn(move |input: Option<i32>| match input {
                None => {
                    // Registered in this iteration only
                    let log = log.clone();
                    let generation = trigger.get().unwrap_or_default();
                    side.then(move |v| log.borrow_mut().push((generation, v)));
                    Ok(Step::wait(&trigger))
                }
                Some(_) => Ok(Step::<i32, ()>::restart()),
            })
        });

        assert_eq!(side.subscriber_count(), 1);
        trigger.set(1);

        // Iteration 1's subscription is gone; iteration 2 made a new one.
        assert_eq!(side.subscriber_count(), 1);
        side.set(10);
        assert_eq!(*fired.borrow(), vec![(1, 10)]);
        assert_eq!(handle.generation(), 2);
    }

    #[test]
    fn cancel_mid_wait_stops_loop() {
        let source = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let handle = spawn_wait_then_restart(&source, &seen);
        source.set(1);
        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(source.subscriber_count(), 1);

        handle.cancel();
        assert_eq!(handle.state(), LoopState::Cancelled);
        assert_eq!(source.subscriber_count(), 0);

        source.set(2);
        assert_eq!(*seen.borrow(), vec![1]);

        handle.cancel();
        assert_eq!(handle.state(), LoopState::Cancelled);
    }

    #[test]
    fn cancelling_owner_context_cancels_loop() {
        let source = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let owner = Context::new();

        let handle = owner.run(|| spawn_wait_then_restart(&source, &seen));
        owner.dispose_all();

        assert_eq!(handle.state(), LoopState::Cancelled);
        source.set(5);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn ready_awaitable_resumes_without_suspending() {
        let handle = Loop::spawn(|| {
            from_fn(|input: Option<i32>| {
                Ok(match input {
                    None => Step::wait(Awaitable::ready(20)),
                    Some(v) => Step::done(v + 1),
                })
            })
        });

        assert_eq!(handle.get(), Some(21));
        assert_eq!(handle.tick(), 2);
    }

    #[test]
    fn coroutine_error_faults_without_restart() {
        let built = Rc::new(Cell::new(0));

        let counter = built.clone();
        let handle = Loop::spawn(move || {
            counter.set(counter.get() + 1);
            from_fn(|_: Option<()>| -> Result<Step<(), ()>, BoxError> { Err("boom".into()) })
        });

        assert_eq!(handle.state(), LoopState::Faulted);
        assert_eq!(built.get(), 1);
        assert_eq!(handle.get(), None);
    }

    #[test]
    fn coroutine_panic_is_reported() {
        let trigger = Signal::<()>::empty();

        let source = trigger.clone();
        let handle = Loop::spawn(move || {
            let source = source.clone();
            from_fn(move |input: Option<()>| -> Result<Step<(), ()>, BoxError> {
                match input {
                    None => Ok(Step::wait(&source)),
                    Some(()) => panic!("tick exploded"),
                }
            })
        });
        let (errors, handler) = collect_errors(handle.signal().id());

        trigger.set(());
        Runtime::remove_error_handler(handler);

        assert_eq!(handle.state(), LoopState::Faulted);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("tick exploded"));
        assert!(!Context::is_active());
    }

    #[test]
    fn runaway_restarts_hit_step_limit() {
        let handle = Loop::spawn(|| from_fn(|_: Option<()>| Ok(Step::<(), ()>::restart())));

        assert_eq!(handle.state(), LoopState::Faulted);
        assert_eq!(handle.generation() as usize, Runtime::config().max_sync_steps);
    }

    #[test]
    fn nested_loop_is_awaitable() {
        let inner_trigger = Signal::<i32>::empty();
        let outcome = Rc::new(Cell::new(0));

        let (trigger, sink) = (inner_trigger.clone(), outcome.clone());
        let outer = Loop::spawn(move || {
            let trigger = trigger.clone();
            let sink = sink.clone();
            from_fn(move |input: Option<i32>| match input {
                None => {
                    let trigger = trigger.clone();
                    let child = create_loop(move || {
                        let trigger = trigger.clone();
                        from_fn(move |input: Option<i32>| {
                            Ok(match input {
                                None => Step::wait(&trigger),
                                Some(v) => Step::done(v * 2),
                            })
                        })
                    });
                    Ok(Step::wait(&child))
                }
                Some(v) => {
                    sink.set(v);
                    Ok(Step::done(v))
                }
            })
        });

        assert_eq!(outer.state(), LoopState::Suspended);
        inner_trigger.set(21);

        assert_eq!(outcome.get(), 42);
        assert_eq!(outer.get(), Some(42));
    }

    #[test]
    fn coroutine_runs_inside_loop_context() {
        let seen = Rc::new(Cell::new(None));

        let sink = seen.clone();
        let handle = Loop::spawn(move || {
            let sink = sink.clone();
            from_fn(move |_: Option<()>| {
                sink.set(Context::current_id());
                Ok(Step::done(()))
            })
        });

        assert!(seen.get().is_some());
        assert!(!Context::is_active());
        // Completion is written by the loop itself
        assert_eq!(handle.signal().author(), seen.get());
    }

    #[test]
    fn factory_state_belongs_to_the_loop() {
        let trigger = Signal::<i32>::empty();
        let states: Rc<RefCell<Vec<Signal<i32>>>> = Rc::default();
        let spawner = Context::new();

        let (source, registry) = (trigger.clone(), states.clone());
        let handle = spawner.run(|| {
            Loop::spawn(move || {
                let state = Signal::new(0);
                registry.borrow_mut().push(state.clone());
                let source = source.clone();
                from_fn(move |input: Option<i32>| {
                    Ok(match input {
                        None => Step::wait(&source),
                        Some(v) => {
                            state.set(v);
                            Step::<i32, ()>::restart()
                        }
                    })
                })
            })
        });

        // Only the loop's own signal is adopted by the spawner.
        assert_eq!(spawner.child_count(), 1);

        let unrelated = Context::new();
        unrelated.run(|| trigger.set(1));
        assert_eq!(unrelated.child_count(), 0);

        let (first, second) = {
            let states = states.borrow();
            (states[0].clone(), states[1].clone())
        };
        assert!(first.is_disposed());

        unrelated.dispose_all();
        second.set(5);
        assert_eq!(second.get(), Some(5));

        handle.cancel();
        assert!(second.is_disposed());
    }

    /// Resolves while subscribing and returns a handle that ignores disposal.
    struct Immediate(i32);

    struct Detached;

    impl Disposable for Detached {}

    impl Thenable<i32> for Immediate {
        fn subscribe(&self, on_resolve: Box<dyn FnOnce(i32)>) -> Rc<dyn Disposable> {
            on_resolve(self.0);
            Rc::new(Detached)
        }
    }

    #[test]
    fn synchronously_resolving_thenable_keeps_ticking() {
        let handle = Loop::spawn(|| {
            let mut count = 0;
            let mut total = 0;
            from_fn(move |input: Option<i32>| {
                total += input.unwrap_or(0);
                Ok(if count < 3 {
                    count += 1;
                    Step::wait(Awaitable::pending(Immediate(count)))
                } else {
                    Step::done(total)
                })
            })
        });

        assert_eq!(handle.state(), LoopState::Completed);
        assert_eq!(handle.get(), Some(6));
        assert_eq!(handle.tick(), 4);
        assert_eq!(handle.generation(), 1);
    }
}

//! Reactive Primitives
//!
//! This module implements the reactive core: signals, ownership contexts,
//! and effects. The coroutine scheduler in [`crate::coroutine`] is built on
//! top of these.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state with a list of one-shot
//! subscribers. Writing a value fires every pending subscriber exactly once,
//! synchronously and in registration order. There is no automatic
//! dependency tracking: observers subscribe explicitly with `then`.
//!
//! ## Contexts
//!
//! A Context is a node in the ownership tree. Everything created while a
//! context is active registers as its child, and disposing the context
//! cancels those children in registration order.
//!
//! ## Effects
//!
//! An Effect runs a callback once inside a fresh context and returns a
//! result signal that doubles as its cancellation handle.
//!
//! # Implementation Notes
//!
//! The active context lives on a thread-local stack, entered through a
//! guard so it is always restored. All handles are `Rc`-based: the runtime
//! is single-threaded and cooperative.

mod signal;
mod context;
mod subscriber;
mod effect;
mod runtime;

pub use signal::{create_signal, Signal};
pub use context::{on_cleanup, Context, ContextGuard, OnCleanup};
pub use subscriber::{ContextId, Disposable, SignalId, Subscriber};
pub use effect::{create_effect, Cleanup, Effect};
pub use runtime::{ErrorHandlerId, Runtime, RuntimeConfig, MAX_SYNC_STEPS_ENV, STRICT_ENV};

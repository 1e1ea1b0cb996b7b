//! Strand Core
//!
//! A small single-threaded reactive runtime. It provides:
//!
//! - Signals with explicit one-shot subscriptions
//! - An ownership tree of contexts with cascading disposal
//! - Effects that run once and tear down on cancel
//! - Restartable coroutine loops with staleness-aware waits
//!
//! # Architecture
//!
//! - `reactive`: signals, contexts, effects and the error channel
//! - `coroutine`: awaitables, the coroutine interface and the loop scheduler
//! - `error`: the crate-wide error type
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use strand_core::coroutine::{from_fn, take, Loop, Step};
//! use strand_core::reactive::Signal;
//!
//! let clicks = Signal::new(0);
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let source = clicks.clone();
//! let sink = seen.clone();
//! let watcher = Loop::spawn(move || {
//!     let source = source.clone();
//!     let sink = sink.clone();
//!     from_fn(move |input: Option<i32>| {
//!         Ok(match input {
//!             None => Step::wait(take(&source)?),
//!             Some(value) => {
//!                 sink.borrow_mut().push(value);
//!                 Step::<i32, ()>::restart()
//!             }
//!         })
//!     })
//! });
//!
//! clicks.set(1);
//! clicks.set(2);
//! watcher.cancel();
//!
//! assert_eq!(*seen.borrow(), vec![0, 1, 2]);
//! ```

pub mod coroutine;
pub mod error;
pub mod reactive;

pub use coroutine::{create_loop, read, take, Awaitable, Coroutine, Loop, Step};
pub use error::{ReactiveError, Result};
pub use reactive::{create_effect, create_signal, Context, Effect, Runtime, Signal};

//! Coroutine Loops
//!
//! Long-running, restartable processes built on the reactive core.
//!
//! # Concepts
//!
//! ## Coroutines
//!
//! A [`Coroutine`] is resumed step by step. Each step either yields an
//! [`Awaitable`] (suspend until it resolves) or completes. Completing
//! without a value restarts the coroutine from scratch; completing with a
//! value finishes the loop.
//!
//! ## Loops
//!
//! A [`Loop`] owns one context for its whole life and re-enters it on every
//! tick. Children created during a tick are disposed before the next one
//! starts, so every wait is scoped to the iteration that issued it.
//!
//! ## Staleness
//!
//! [`take`] and [`read`] use the per-context age cache to decide whether a
//! signal has changed since the context last looked at it.

mod awaitable;
mod step;
mod scheduler;
mod take;

pub use awaitable::{Awaitable, Thenable};
pub use step::{from_fn, Coroutine, FnCoroutine, Step};
pub use scheduler::{create_loop, Loop, LoopState};
pub use take::{read, take};

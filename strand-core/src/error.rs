//! Error Types
//!
//! Every failure the runtime can observe is a [`ReactiveError`]. Usage errors
//! (such as calling [`take`](crate::coroutine::take) outside of any context)
//! are returned to the caller. Failures that happen while the runtime is
//! driving user code on its own (a coroutine blowing up mid-tick, a cleanup
//! panicking during disposal) have no caller to return to, so they are sent
//! through [`Runtime::report`](crate::reactive::Runtime::report) instead.

use std::any::Any;

use thiserror::Error;

use crate::reactive::{ContextId, SignalId};

/// Error type returned by a coroutine step.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReactiveError {
    /// `take` or `read` was called while no effect or loop body was running.
    #[error("`{operation}` requires an active effect or loop context")]
    NoActiveContext { operation: &'static str },

    /// A coroutine step returned an error. The loop is terminated.
    #[error("loop {signal} failed at tick {tick}: {source}")]
    Coroutine {
        signal: SignalId,
        tick: u64,
        #[source]
        source: BoxError,
    },

    /// A coroutine step panicked. The loop is terminated.
    #[error("loop {signal} panicked at tick {tick}: {message}")]
    CoroutinePanicked {
        signal: SignalId,
        tick: u64,
        message: String,
    },

    /// A loop kept ticking without ever suspending.
    #[error("loop {signal} ran {steps} ticks without suspending")]
    StepLimitExceeded { signal: SignalId, steps: usize },

    /// A cleanup function or child disposal panicked.
    #[error("cleanup in context {context} panicked: {message}")]
    CleanupPanicked { context: ContextId, message: String },
}

impl ReactiveError {
    /// The loop signal this error belongs to, if any.
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            Self::Coroutine { signal, .. }
            | Self::CoroutinePanicked { signal, .. }
            | Self::StepLimitExceeded { signal, .. } => Some(*signal),
            Self::NoActiveContext { .. } | Self::CleanupPanicked { .. } => None,
        }
    }

    /// The context this error belongs to, if any.
    pub fn context(&self) -> Option<ContextId> {
        match self {
            Self::CleanupPanicked { context, .. } => Some(*context),
            _ => None,
        }
    }
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

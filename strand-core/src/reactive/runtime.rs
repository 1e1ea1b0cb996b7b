//! Reactive Runtime
//!
//! The runtime holds the little state that is genuinely process-wide:
//!
//! 1. The [`RuntimeConfig`], read whenever a loop ticks or a disposed
//!    handle is misused.
//!
//! 2. The error channel. Failures that happen while the runtime drives user
//!    code on its own (a coroutine failing mid-tick, a cleanup panicking)
//!    cannot be returned to anyone. They are logged and handed to every
//!    handler registered with [`Runtime::on_error`].
//!
//! # Thread Safety
//!
//! Signals and contexts are single-threaded, but configuration and error
//! handlers are shared by every thread, so they live behind `parking_lot`
//! locks in global registries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::subscriber::SignalId;
use crate::error::ReactiveError;

/// Environment variable toggling strict mode.
pub const STRICT_ENV: &str = "STRAND_STRICT";

/// Environment variable overriding [`RuntimeConfig::max_sync_steps`].
pub const MAX_SYNC_STEPS_ENV: &str = "STRAND_MAX_SYNC_STEPS";

/// Process-wide runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Promote tolerated misuse (writing to or subscribing on a disposed
    /// handle) from a debug log to a warning.
    pub strict: bool,

    /// How many ticks a loop may run back to back without suspending before
    /// it is faulted.
    pub max_sync_steps: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict: cfg!(debug_assertions),
            max_sync_steps: 10_000,
        }
    }
}

impl RuntimeConfig {
    /// Build a config from `STRAND_STRICT` and `STRAND_MAX_SYNC_STEPS`,
    /// keeping defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(STRICT_ENV) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.strict = true,
                "0" | "false" | "no" | "off" => config.strict = false,
                _ => tracing::warn!(key = STRICT_ENV, value = %raw, "ignoring invalid setting"),
            }
        }

        if let Some(raw) = lookup(MAX_SYNC_STEPS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(steps) if steps > 0 => config.max_sync_steps = steps,
                _ => {
                    tracing::warn!(key = MAX_SYNC_STEPS_ENV, value = %raw, "ignoring invalid setting")
                }
            }
        }

        config
    }
}

/// Identifies a registered error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorHandlerId(u64);

type ErrorHandler = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();
static ERROR_HANDLERS: OnceLock<RwLock<HashMap<ErrorHandlerId, ErrorHandler>>> = OnceLock::new();

fn get_config() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::from_env()))
}

fn get_error_handlers() -> &'static RwLock<HashMap<ErrorHandlerId, ErrorHandler>> {
    ERROR_HANDLERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The global reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Replace the process-wide configuration.
    pub fn configure(config: RuntimeConfig) {
        tracing::debug!(?config, "runtime reconfigured");
        *get_config().write() = config;
    }

    /// Snapshot of the current configuration.
    ///
    /// Until [`Runtime::configure`] is called this is
    /// [`RuntimeConfig::from_env`], read once on first use.
    pub fn config() -> RuntimeConfig {
        get_config().read().clone()
    }

    /// Register a handler that receives every reported error.
    pub fn on_error<F>(handler: F) -> ErrorHandlerId
    where
        F: Fn(&ReactiveError) + Send + Sync + 'static,
    {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = ErrorHandlerId(COUNTER.fetch_add(1, Ordering::Relaxed));
        get_error_handlers().write().insert(id, Arc::new(handler));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn remove_error_handler(id: ErrorHandlerId) -> bool {
        get_error_handlers().write().remove(&id).is_some()
    }

    /// Send an error through the process-wide error channel.
    pub fn report(error: ReactiveError) {
        tracing::error!(%error, "unhandled reactive error");

        // Release the lock before running handlers so they may (un)register.
        let handlers: Vec<ErrorHandler> = get_error_handlers().read().values().cloned().collect();
        for handler in handlers {
            handler(&error);
        }
    }

    /// Log a write or subscription on a disposed handle.
    pub(crate) fn diagnose_disposed(signal: SignalId, operation: &'static str) {
        if Self::config().strict {
            tracing::warn!(%signal, operation, "operation on a disposed signal ignored");
        } else {
            tracing::debug!(%signal, operation, "operation on a disposed signal ignored");
        }
    }
}

//! Ownership Context
//!
//! A context is a node in the ownership tree. Every signal, effect and loop
//! created while a context is active registers itself as one of that
//! context's children, so disposing the context tears down everything that
//! was built inside it.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the active context. Entering a
//! context pushes it and returns a guard; dropping the guard pops it again.
//! Because the pop lives in `Drop`, the previous context is restored on every
//! exit path, including unwinding out of user code.
//!
//! Each context also carries the staleness cache used by `take` and `read`:
//! a map from signal id to the last age this context acknowledged.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::runtime::Runtime;
use super::subscriber::{ContextId, Disposable, SignalId};
use crate::error::{panic_message, ReactiveError};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Context>> = RefCell::new(Vec::new());
}

type Children = SmallVec<[Rc<dyn Disposable>; 4]>;

struct ContextInner {
    id: ContextId,
    children: RefCell<Children>,
    cache: RefCell<IndexMap<SignalId, u64>>,
}

/// A node of the ownership tree.
///
/// Cloning a context yields another handle to the same node.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

/// Non-owning handle to a context.
#[derive(Clone)]
pub(crate) struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }
}

/// Guard that pops the context when dropped.
pub struct ContextGuard {
    id: ContextId,
}

impl Context {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ContextInner {
                id: ContextId::new(),
                children: RefCell::new(SmallVec::new()),
                cache: RefCell::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Make this context the active one until the returned guard is dropped.
    pub fn enter(&self) -> ContextGuard {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        tracing::trace!(context = %self.id(), "entered context");
        ContextGuard { id: self.id() }
    }

    /// Run `f` with this context active.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// The active context, if any.
    pub fn current() -> Option<Context> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Id of the active context, if any.
    pub fn current_id() -> Option<ContextId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(Context::id))
    }

    /// Check if there is an active context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Hand `node` to the active context.
    ///
    /// Returns `false` when no context is active. The node is then an
    /// orphan: nothing will dispose it, which is how top-level roots live.
    pub fn register_child(node: Rc<dyn Disposable>) -> bool {
        match Self::current() {
            Some(context) => {
                context.adopt(node);
                true
            }
            None => false,
        }
    }

    /// Append `node` to this context's children.
    pub fn adopt(&self, node: Rc<dyn Disposable>) {
        self.inner.children.borrow_mut().push(node);
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Dispose every child in registration order, then forget them.
    ///
    /// The list is drained before the first child runs, so a child that
    /// registers new nodes while being disposed cannot be skipped or visited
    /// twice. A panicking child is reported and the pass continues with its
    /// siblings. Calling this on an already drained context does nothing.
    pub fn dispose_all(&self) {
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        if children.is_empty() {
            return;
        }

        tracing::trace!(context = %self.id(), count = children.len(), "disposing children");

        for child in children {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| child.dispose())) {
                Runtime::report(ReactiveError::CleanupPanicked {
                    context: self.id(),
                    message: panic_message(&*payload),
                });
            }
        }
    }

    /// Dispose all children and drop the staleness cache.
    pub fn release(&self) {
        self.dispose_all();
        self.inner.cache.borrow_mut().clear();
    }

    /// The age of `signal` this context last acknowledged.
    pub fn cached_age(&self, signal: SignalId) -> Option<u64> {
        self.inner.cache.borrow().get(&signal).copied()
    }

    /// Record that this context has seen `signal` at `age`.
    ///
    /// Entries only move forward; acknowledging an older age is ignored.
    pub fn acknowledge(&self, signal: SignalId, age: u64) {
        let mut cache = self.inner.cache.borrow_mut();
        let entry = cache.entry(signal).or_insert(age);
        if *entry < age {
            *entry = age;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id())
            .field("children", &self.child_count())
            .field("cached", &self.inner.cache.borrow().len())
            .finish()
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Guards must be dropped in reverse order of creation.
            if let Some(context) = popped {
                debug_assert_eq!(
                    context.id(),
                    self.id,
                    "Context mismatch: expected {}, got {}",
                    self.id,
                    context.id()
                );
            }
        });
    }
}

/// A cleanup closure registered as a context child.
pub struct OnCleanup {
    cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Disposable for OnCleanup {
    fn dispose(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Run `f` when the active context is disposed.
///
/// Returns `false` (and drops `f` without running it) when no context is
/// active.
pub fn on_cleanup(f: impl FnOnce() + 'static) -> bool {
    Context::register_child(Rc::new(OnCleanup {
        cleanup: RefCell::new(Some(Box::new(f))),
    }))
}

//! Executors: strategies for running subscriber blocks.
//!
//! An [`Executor`] is a value describing *where* a block runs, not a thread
//! it owns: inline on the calling thread, on one of the shared priority-lane
//! pools, on a named serial queue, or through a user-supplied dispatch
//! closure. Every delivery in the library goes through an executor, and the
//! delivered block always receives the executor that performed the delivery.
//!
//! # Inline delivery
//!
//! When an executor's `strict_async` flag is off and the dispatching side
//! passes itself as `from`, the block may run inline instead of being
//! queued. This is the source of the library's sync-or-async optionality:
//! a subscriber on the same serial queue as the producer sees its events
//! synchronously, everyone else through the queue.

pub mod pool;
mod serial;
pub mod timer;

pub use pool::PoolOptions;
pub use timer::TimerHandle;

use serial::SerialQueue;
use std::sync::Arc;
use std::time::Duration;

/// A unit of queued work, as handed to a custom dispatcher.
pub type Task = Box<dyn FnOnce() + Send>;

/// Priority lanes backed by shared worker pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// The library default.
    Default,
    /// Work the user is actively waiting on.
    UserInteractive,
    /// Work the user initiated and expects promptly.
    UserInitiated,
    /// Long-running maintenance work.
    Utility,
    /// Work with no latency expectations.
    Background,
}

impl Lane {
    pub(crate) const ALL: [Self; 5] = [
        Self::Default,
        Self::UserInteractive,
        Self::UserInitiated,
        Self::Utility,
        Self::Background,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Default => 0,
            Self::UserInteractive => 1,
            Self::UserInitiated => 2,
            Self::Utility => 3,
            Self::Background => 4,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::UserInteractive => "user-interactive",
            Self::UserInitiated => "user-initiated",
            Self::Utility => "utility",
            Self::Background => "background",
        }
    }
}

/// User-supplied dispatch, kept behind a thin wrapper so executor identity
/// can be compared by pointer.
struct CustomDispatch {
    dispatch: Box<dyn Fn(Task) + Send + Sync>,
}

#[derive(Clone)]
enum Kind {
    Immediate,
    Lane(Lane),
    Serial(Arc<SerialQueue>),
    Custom(Arc<CustomDispatch>),
}

struct Inner {
    kind: Kind,
    strict_async: bool,
}

/// A strategy for dispatching blocks.
///
/// Cheap to clone; clones share identity (see
/// [`same_executor`](Self::same_executor)).
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    fn with_kind(kind: Kind, strict_async: bool) -> Self {
        Self {
            inner: Arc::new(Inner { kind, strict_async }),
        }
    }

    /// Runs blocks inline on whatever thread dispatches them.
    #[must_use]
    pub fn immediate() -> Self {
        Self::with_kind(Kind::Immediate, false)
    }

    /// The library default: the shared [`Lane::Default`] pool.
    #[must_use]
    pub fn primary() -> Self {
        Self::with_kind(Kind::Lane(Lane::Default), false)
    }

    /// The shared pool for the given priority lane.
    #[must_use]
    pub fn lane(lane: Lane) -> Self {
        Self::with_kind(Kind::Lane(lane), false)
    }

    /// Shorthand for [`Lane::UserInteractive`].
    #[must_use]
    pub fn user_interactive() -> Self {
        Self::lane(Lane::UserInteractive)
    }

    /// Shorthand for [`Lane::UserInitiated`].
    #[must_use]
    pub fn user_initiated() -> Self {
        Self::lane(Lane::UserInitiated)
    }

    /// Shorthand for [`Lane::Utility`].
    #[must_use]
    pub fn utility() -> Self {
        Self::lane(Lane::Utility)
    }

    /// Shorthand for [`Lane::Background`].
    #[must_use]
    pub fn background() -> Self {
        Self::lane(Lane::Background)
    }

    /// A named serial queue with its own single worker.
    ///
    /// Blocks submitted to the same serial executor run one at a time, in
    /// submission order.
    #[must_use]
    pub fn serial(name: impl Into<String>) -> Self {
        Self::with_kind(Kind::Serial(Arc::new(SerialQueue::new(name.into()))), false)
    }

    /// Wraps a user-supplied dispatch closure.
    #[must_use]
    pub fn custom(dispatch: impl Fn(Task) + Send + Sync + 'static) -> Self {
        Self::with_kind(
            Kind::Custom(Arc::new(CustomDispatch {
                dispatch: Box::new(dispatch),
            })),
            false,
        )
    }

    /// Returns a copy of this executor with the `strict_async` flag set.
    ///
    /// A strict executor never runs blocks inline, even when the dispatching
    /// side is the executor itself. Identity is preserved: the copy compares
    /// equal to the original under [`same_executor`](Self::same_executor).
    #[must_use]
    pub fn with_strict_async(&self, strict_async: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind: self.inner.kind.clone(),
                strict_async,
            }),
        }
    }

    /// Whether every dispatch must go through this executor's own scheduler.
    #[must_use]
    pub fn strict_async(&self) -> bool {
        self.inner.strict_async
    }

    /// Whether `self` and `other` name the same scheduling destination.
    #[must_use]
    pub fn same_executor(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        match (&self.inner.kind, &other.inner.kind) {
            (Kind::Immediate, Kind::Immediate) => true,
            (Kind::Lane(a), Kind::Lane(b)) => a == b,
            (Kind::Serial(a), Kind::Serial(b)) => Arc::ptr_eq(a, b),
            (Kind::Custom(a), Kind::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Runs `block`, inline when permitted, otherwise through the scheduler.
    ///
    /// `from` is the executor of the code performing the dispatch, if known.
    /// The block receives the executor that ends up delivering it.
    pub fn execute<F>(&self, from: Option<&Self>, block: F)
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        if matches!(self.inner.kind, Kind::Immediate) {
            block(self);
            return;
        }
        if !self.inner.strict_async && from.is_some_and(|f| f.same_executor(self)) {
            block(self);
            return;
        }
        let me = self.clone();
        let task: Task = Box::new(move || block(&me));
        match &self.inner.kind {
            Kind::Immediate => unreachable!("immediate handled above"),
            Kind::Lane(lane) => pool::shared(*lane).submit(task),
            Kind::Serial(queue) => queue.submit(task),
            Kind::Custom(custom) => (custom.dispatch)(task),
        }
    }

    /// Runs `block` through this executor after `delay`.
    ///
    /// The returned handle cancels the pending dispatch; cancelling after
    /// the block has started has no effect.
    pub fn execute_after<F>(&self, delay: Duration, block: F) -> TimerHandle
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let me = self.clone();
        timer::shared().schedule(
            delay,
            Box::new(move || {
                let target = me.clone();
                target.execute(None, move |origin| block(origin));
            }),
        )
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::primary()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner.kind {
            Kind::Immediate => "Immediate".to_string(),
            Kind::Lane(lane) => format!("Lane({})", lane.name()),
            Kind::Serial(queue) => format!("Serial({})", queue.name()),
            Kind::Custom(_) => "Custom".to_string(),
        };
        f.debug_struct("Executor")
            .field("kind", &kind)
            .field("strict_async", &self.inner.strict_async)
            .finish()
    }
}

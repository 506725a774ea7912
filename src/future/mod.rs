//! Single-completion asynchronous values.
//!
//! A [`Future`] is the read handle and a [`Promise`] the read+write handle
//! for a value that completes exactly once. All shared state lives behind a
//! single swapped head:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HEAD TRANSITIONS                       │
//! │                                                             │
//! │   Initial ──subscribe──► Subscribed ──subscribe──► (push)   │
//! │      │                       │                              │
//! │      └──────complete─────────┴──────complete──► Completed   │
//! │                                                (terminal)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transitions are monotonic and the completing writer is unique: exactly
//! one `try_complete` call returns true, and that caller walks the former
//! subscriber chain, delivers the completion through each handler's
//! executor, and drains the release pool.
//!
//! Subscribing to an already completed future never hangs: the stored
//! completion is scheduled on the subscriber's executor immediately.

use crate::cancel::{CancelToken, Cancellable, Completable};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::handler::{HandlerCore, Link, Subscription};
use crate::head::HeadCell;
use crate::release_pool::ReleasePool;
use crate::tracing_compat::trace;
use crate::types::{Fallible, Transferable};
use smallvec::SmallVec;
use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

/// Returned by [`Future::wait_timeout`] when the deadline passes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait timed out before the value completed")]
pub struct WaitTimedOut;

type FirstSubscribeHook = Box<dyn FnOnce() + Send>;

enum FutureState<T: Transferable> {
    /// No subscribers yet. The hook, if any, runs on the first subscription.
    Initial {
        on_first: Mutex<Option<FirstSubscribeHook>>,
    },
    /// Live subscriber chain, newest link first.
    Subscribed {
        chain: Option<Arc<Link<Fallible<T>>>>,
    },
    /// Terminal.
    Completed { result: Fallible<T> },
}

pub(crate) struct FutureCore<T: Transferable> {
    head: HeadCell<FutureState<T>>,
    pool: ReleasePool,
}

impl<T: Transferable> FutureCore<T> {
    fn with_state(state: FutureState<T>) -> Arc<Self> {
        Arc::new(Self {
            head: HeadCell::new(state),
            pool: ReleasePool::new(),
        })
    }

    pub(crate) fn try_complete(&self, result: Fallible<T>, from: Option<&Executor>) -> bool {
        let (old, new) = self.head.update(|state| match state {
            FutureState::Completed { .. } => None,
            _ => Some(FutureState::Completed {
                result: result.clone(),
            }),
        });
        if Arc::ptr_eq(&old, &new) {
            return false;
        }
        trace!(failed = result.is_failure(), "future completed");

        if let FutureState::Subscribed { chain } = &*old {
            let mut to_schedule: SmallVec<[_; 4]> = SmallVec::new();
            for handler in Link::live(chain) {
                if handler.enqueue(result.clone(), true) {
                    to_schedule.push(handler);
                }
            }
            for handler in &to_schedule {
                handler.schedule(from);
            }
        }
        self.pool.drain();
        true
    }
}

impl<T: Transferable> Completable for FutureCore<T> {
    fn complete_error(&self, error: Error) -> bool {
        self.try_complete(Fallible::failure(error), None)
    }
}

/// The read handle for a single-completion value.
///
/// Cheap to clone; clones observe the same completion.
pub struct Future<T: Transferable> {
    core: Arc<FutureCore<T>>,
}

impl<T: Transferable> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Transferable> Future<T> {
    /// A future already completed with `result`.
    #[must_use]
    pub fn ready(result: Fallible<T>) -> Self {
        Self {
            core: FutureCore::with_state(FutureState::Completed { result }),
        }
    }

    /// A future already completed with a success.
    #[must_use]
    pub fn value(value: T) -> Self {
        Self::ready(Fallible::success(value))
    }

    /// A future already completed with a failure.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::ready(Fallible::failure(error))
    }

    /// Runs `block` on `executor` and completes with its result.
    pub fn run<F>(executor: &Executor, block: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        let p = promise.clone();
        executor.execute(None, move |origin| {
            p.try_complete(block().into(), Some(origin));
        });
        promise.future()
    }

    /// Like [`run`](Self::run), but `block` is not dispatched until the
    /// first subscriber attaches.
    pub fn lazy<F>(executor: &Executor, block: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let executor = executor.clone();
        let core = Arc::new_cyclic(|weak: &Weak<FutureCore<T>>| {
            let weak = weak.clone();
            let hook: FirstSubscribeHook = Box::new(move || {
                let Some(core) = weak.upgrade() else { return };
                executor.execute(None, move |origin| {
                    core.try_complete(block().into(), Some(origin));
                });
            });
            FutureCore {
                head: HeadCell::new(FutureState::Initial {
                    on_first: Mutex::new(Some(hook)),
                }),
                pool: ReleasePool::new(),
            }
        });
        Self { core }
    }

    /// Runs `block` through `executor` after `delay` and completes with its
    /// result.
    pub fn after<F>(executor: &Executor, delay: Duration, block: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        let p = promise.clone();
        let handle = executor.execute_after(delay, move |origin| {
            p.try_complete(block().into(), Some(origin));
        });
        promise.release_pool().insert(handle);
        promise.future()
    }

    /// Like [`after`](Self::after), wired to a cancellation token.
    ///
    /// Cancelling the token before or during the delay fails the future
    /// with a cancellation error and drops the pending timer entry.
    pub fn after_with<F>(
        executor: &Executor,
        delay: Duration,
        token: &CancelToken,
        block: F,
    ) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        let p = promise.clone();
        let handle = executor.execute_after(delay, move |origin| {
            p.try_complete(block().into(), Some(origin));
        });
        token.add(Arc::new(handle.clone()));
        token.add(Arc::new(promise.clone()));
        promise.release_pool().insert(handle);
        promise.future()
    }

    /// Registers a completion subscriber.
    ///
    /// If the future has already completed, the stored completion is
    /// scheduled on `executor` exactly once and `None` is returned (there is
    /// nothing left to unsubscribe from). Otherwise the returned
    /// [`Subscription`] keeps the registration alive: drop it and the
    /// subscriber is skipped on the completion walk.
    ///
    /// The block receives the completion and the executor that delivered it.
    pub fn subscribe<F>(&self, executor: &Executor, block: F) -> Option<Subscription>
    where
        F: Fn(Fallible<T>, &Executor) + Send + Sync + 'static,
    {
        let owner: Arc<dyn Any + Send + Sync> = Arc::clone(&self.core) as _;
        let handler = HandlerCore::new(executor.clone(), owner, block);
        let weak = Arc::downgrade(&handler);
        let (old, new) = self.core.head.update(|state| match state {
            FutureState::Completed { .. } => None,
            FutureState::Initial { .. } => Some(FutureState::Subscribed {
                chain: Link::push(&None, weak.clone()),
            }),
            FutureState::Subscribed { chain } => Some(FutureState::Subscribed {
                chain: Link::push(chain, weak.clone()),
            }),
        });

        if Arc::ptr_eq(&old, &new) {
            if let FutureState::Completed { result } = &*old {
                if handler.enqueue(result.clone(), true) {
                    handler.schedule(None);
                }
            }
            return None;
        }
        if let FutureState::Initial { on_first } = &*old {
            if let Some(hook) = on_first.lock().expect("lazy-start lock poisoned").take() {
                hook();
            }
        }
        Some(Subscription::new(handler))
    }

    /// Registers a subscriber for the success arm only.
    pub fn on_success<F>(&self, executor: &Executor, block: F) -> Option<Subscription>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(executor, move |result, _| {
            if let Fallible::Success(value) = result {
                block(value);
            }
        })
    }

    /// Registers a subscriber for the failure arm only.
    pub fn on_failure<F>(&self, executor: &Executor, block: F) -> Option<Subscription>
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.subscribe(executor, move |result, _| {
            if let Fallible::Failure(error) = result {
                block(error);
            }
        })
    }

    /// Returns the completion, if the future has completed.
    #[must_use]
    pub fn completion(&self) -> Option<Fallible<T>> {
        match &*self.core.head.load() {
            FutureState::Completed { result } => Some(result.clone()),
            _ => None,
        }
    }

    /// Returns true once the future has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(&*self.core.head.load(), FutureState::Completed { .. })
    }

    /// Blocks the calling thread until the future completes.
    pub fn wait(&self) -> Fallible<T> {
        match self.wait_internal(None) {
            Ok(result) => result,
            Err(WaitTimedOut) => unreachable!("untimed wait cannot time out"),
        }
    }

    /// Blocks the calling thread until the future completes or `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimedOut`] if the deadline passes first; the future is
    /// left untouched and may still complete later.
    pub fn wait_timeout(&self, timeout: Duration) -> core::result::Result<Fallible<T>, WaitTimedOut> {
        self.wait_internal(Some(timeout))
    }

    fn wait_internal(
        &self,
        timeout: Option<Duration>,
    ) -> core::result::Result<Fallible<T>, WaitTimedOut> {
        struct WaitCell<T> {
            slot: Mutex<Option<Fallible<T>>>,
            condvar: Condvar,
        }

        let cell = Arc::new(WaitCell {
            slot: Mutex::new(None),
            condvar: Condvar::new(),
        });
        let signal = Arc::clone(&cell);
        // Keep the subscription alive for the duration of the wait.
        let _subscription = self.subscribe(&Executor::immediate(), move |result, _| {
            *signal.slot.lock().expect("wait slot lock poisoned") = Some(result);
            signal.condvar.notify_all();
        });

        let mut slot = cell.slot.lock().expect("wait slot lock poisoned");
        match timeout {
            None => {
                while slot.is_none() {
                    slot = cell
                        .condvar
                        .wait(slot)
                        .expect("wait slot lock poisoned");
                }
            }
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while slot.is_none() {
                    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                    if remaining.is_zero() {
                        return Err(WaitTimedOut);
                    }
                    let (next, _) = cell
                        .condvar
                        .wait_timeout(slot, remaining)
                        .expect("wait slot lock poisoned");
                    slot = next;
                }
            }
        }
        Ok(slot.take().expect("wait slot emptied while locked"))
    }
}

impl<T: Transferable> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.core.head.load() {
            FutureState::Initial { .. } => "initial",
            FutureState::Subscribed { .. } => "subscribed",
            FutureState::Completed { .. } => "completed",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

/// The read+write handle for a single-completion value.
///
/// Derefs to its [`Future`] read surface. Cheap to clone; clones write to
/// the same value, and the completion-uniqueness guarantee holds across all
/// of them.
pub struct Promise<T: Transferable> {
    future: Future<T>,
}

impl<T: Transferable> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<T: Transferable> Promise<T> {
    /// Creates an incomplete promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            future: Future {
                core: FutureCore::with_state(FutureState::Initial {
                    on_first: Mutex::new(None),
                }),
            },
        }
    }

    /// Creates an incomplete promise whose hook runs on the first
    /// subscription.
    ///
    /// The hook fires exactly once, on the thread performing that first
    /// subscription, and never fires if the promise completes while still
    /// unobserved.
    #[must_use]
    pub fn new_lazy(on_first_subscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            future: Future {
                core: FutureCore::with_state(FutureState::Initial {
                    on_first: Mutex::new(Some(Box::new(on_first_subscribe))),
                }),
            },
        }
    }

    /// Returns a read handle.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        self.future.clone()
    }

    /// Attempts to complete the value.
    ///
    /// Returns true if this call performed the completion; exactly one call
    /// across all writers does. The winning caller delivers the completion
    /// to every live subscriber through that subscriber's executor and
    /// drains the release pool. Completing from within a subscriber block
    /// is safe.
    pub fn try_complete(&self, result: Fallible<T>, from: Option<&Executor>) -> bool {
        self.future.core.try_complete(result, from)
    }

    /// Completes with a success. Returns false if already completed.
    pub fn succeed(&self, value: T) -> bool {
        self.try_complete(Fallible::success(value), None)
    }

    /// Completes with a failure. Returns false if already completed.
    pub fn fail(&self, error: Error) -> bool {
        self.try_complete(Fallible::failure(error), None)
    }

    /// Forwards `source`'s completion into this promise.
    ///
    /// The forwarding subscription is retained in this promise's release
    /// pool, so it lives exactly until this promise completes.
    pub fn complete_with(&self, source: &Future<T>) {
        let weak = self.downgrade();
        let subscription = source.subscribe(&Executor::immediate(), move |result, origin| {
            if let Some(promise) = weak.upgrade() {
                promise.try_complete(result, Some(origin));
            }
        });
        if let Some(subscription) = subscription {
            self.release_pool().insert(subscription);
        }
    }

    /// The promise's release pool, drained when it completes.
    #[must_use]
    pub fn release_pool(&self) -> &ReleasePool {
        &self.future.core.pool
    }

    /// A weak completable reference for context-dependent registration.
    ///
    /// The reference tracks the underlying value: it stops upgrading once
    /// every handle and subscription referencing the value is gone.
    #[must_use]
    pub fn completable(&self) -> Weak<dyn Completable> {
        let weak: Weak<FutureCore<T>> = Arc::downgrade(&self.future.core);
        weak
    }

    pub(crate) fn downgrade(&self) -> WeakPromise<T> {
        WeakPromise {
            core: Arc::downgrade(&self.future.core),
        }
    }
}

impl<T: Transferable> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transferable> std::ops::Deref for Promise<T> {
    type Target = Future<T>;

    fn deref(&self) -> &Self::Target {
        &self.future
    }
}

impl<T: Transferable> Cancellable for Promise<T> {
    fn cancel(&self) {
        self.fail(Error::cancelled());
    }
}

impl<T: Transferable> Completable for Promise<T> {
    fn complete_error(&self, error: Error) -> bool {
        self.fail(error)
    }
}

impl<T: Transferable> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").field("future", &self.future).finish()
    }
}

/// A weak promise used by forwarding closures so that derived values do not
/// keep themselves alive.
pub(crate) struct WeakPromise<T: Transferable> {
    core: Weak<FutureCore<T>>,
}

impl<T: Transferable> WeakPromise<T> {
    pub(crate) fn upgrade(&self) -> Option<Promise<T>> {
        self.core.upgrade().map(|core| Promise {
            future: Future { core },
        })
    }
}

//! Execution contexts: host objects whose lifetime bounds dependent work.
//!
//! A context is any host object that exposes an executor and collects
//! dependents. Dependents are held weakly, so dropping the last user
//! reference to a pending value simply lets it die; but when the *context*
//! dies first, every still-reachable dependent is failed with a
//! context-dropped error.
//!
//! Hosts embed a [`ContextCore`] and delegate the [`ExecutionContext`]
//! trait to it; the core's `Drop` is the deinit hook that sweeps the
//! dependents.

use crate::cancel::Completable;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::future::{Future, Promise};
use crate::tracing_compat::debug;
use crate::types::Transferable;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// A host object bounding the lifetime of dependent asynchronous work.
pub trait ExecutionContext: Send + Sync + 'static {
    /// The executor context-bound blocks run on.
    fn executor(&self) -> Executor;

    /// Registers a dependent to be failed when the context dies.
    ///
    /// The dependent is held weakly; registration does not keep it alive.
    fn register_dependent(&self, dependent: Weak<dyn Completable>);

    /// Whether the context is still usable.
    ///
    /// A reachable context is alive by default; hosts with an earlier
    /// logical teardown point may override.
    fn is_alive(&self) -> bool {
        true
    }
}

/// The embeddable state behind an [`ExecutionContext`].
///
/// Dropping the core fails every still-reachable dependent with a
/// context-dropped error, in registration order.
pub struct ContextCore {
    executor: Executor,
    dependents: Mutex<Vec<Weak<dyn Completable>>>,
}

impl ContextCore {
    /// Creates a core dispatching onto `executor`.
    #[must_use]
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            dependents: Mutex::new(Vec::new()),
        }
    }
}

impl ExecutionContext for ContextCore {
    fn executor(&self) -> Executor {
        self.executor.clone()
    }

    fn register_dependent(&self, dependent: Weak<dyn Completable>) {
        let mut dependents = self.dependents.lock().expect("context dependents lock poisoned");
        dependents.retain(|d| d.strong_count() > 0);
        dependents.push(dependent);
    }
}

impl Drop for ContextCore {
    fn drop(&mut self) {
        let dependents = std::mem::take(
            &mut *self.dependents.lock().expect("context dependents lock poisoned"),
        );
        debug!(dependents = dependents.len(), "context died, failing dependents");
        for dependent in dependents {
            if let Some(dependent) = dependent.upgrade() {
                dependent.complete_error(Error::context_dropped());
            }
        }
    }
}

impl std::fmt::Debug for ContextCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCore")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl<T: Transferable> Future<T> {
    /// Runs `block` on the context's executor and completes with its result.
    ///
    /// The context is captured weakly: the block receives a strong reference
    /// restored from the weak one, and if the context has died by the time
    /// the block would run, the future fails with a context-dropped error.
    /// The future is registered as a dependent, so a context that dies while
    /// the block is still queued fails it promptly too.
    pub fn with_context<C, F>(context: &Arc<C>, block: F) -> Self
    where
        C: ExecutionContext,
        F: FnOnce(&C) -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        context.register_dependent(promise.completable());
        let weak = Arc::downgrade(context);
        let p = promise.clone();
        context.executor().execute(None, move |origin| {
            match weak.upgrade() {
                Some(context) => {
                    p.try_complete(block(&context).into(), Some(origin));
                }
                None => {
                    p.fail(Error::context_dropped());
                }
            }
        });
        promise.future()
    }

    /// Like [`with_context`](Self::with_context), delayed by `delay`.
    ///
    /// A context dying during the delay fails the future immediately; the
    /// timer entry then finds the future already completed and is a no-op.
    pub fn after_with_context<C, F>(context: &Arc<C>, delay: Duration, block: F) -> Self
    where
        C: ExecutionContext,
        F: FnOnce(&C) -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        context.register_dependent(promise.completable());
        let weak = Arc::downgrade(context);
        let p = promise.clone();
        let handle = context.executor().execute_after(delay, move |origin| {
            match weak.upgrade() {
                Some(context) => {
                    p.try_complete(block(&context).into(), Some(origin));
                }
                None => {
                    p.fail(Error::context_dropped());
                }
            }
        });
        promise.release_pool().insert(handle);
        promise.future()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Host {
        core: ContextCore,
        hits: AtomicUsize,
    }

    impl Host {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                core: ContextCore::new(Executor::immediate()),
                hits: AtomicUsize::new(0),
            })
        }
    }

    impl ExecutionContext for Host {
        fn executor(&self) -> Executor {
            self.core.executor()
        }

        fn register_dependent(&self, dependent: Weak<dyn Completable>) {
            self.core.register_dependent(dependent);
        }
    }

    #[test]
    fn block_receives_live_context() {
        let host = Host::new();
        let future = Future::with_context(&host, |host: &Host| {
            host.hits.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });
        assert_eq!(future.wait().success_ref(), Some(&7));
        assert_eq!(host.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dead_context_fails_pending_dependent() {
        let host = Host::new();
        let future = Future::<i32>::after_with_context(&host, Duration::from_millis(200), |_| Ok(7));
        drop(host);
        let result = future.wait();
        assert!(result
            .failure_ref()
            .expect("failure expected")
            .is_context_dropped());
    }

    #[test]
    fn dropping_the_dependent_first_is_harmless() {
        let host = Host::new();
        let future = Future::<i32>::after_with_context(&host, Duration::from_millis(50), |_| Ok(1));
        drop(future);
        drop(host);
    }

    #[test]
    fn completed_dependent_is_untouched_by_context_death() {
        let host = Host::new();
        let future = Future::with_context(&host, |_| Ok(3));
        assert_eq!(future.wait().success_ref(), Some(&3));
        drop(host);
        assert!(matches!(future.wait(), Fallible::Success(3)));
    }

    #[test]
    fn core_is_alive_while_reachable() {
        let host = Host::new();
        assert!(host.is_alive());
    }
}

//! Future combinators.

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::future::{Future, Promise};
use crate::types::{Fallible, Transferable};
use std::time::Duration;

impl<T: Transferable> Future<T> {
    /// Completes with `transform` applied to the success value.
    ///
    /// Failures are forwarded unchanged. The transform runs on `executor`.
    pub fn map<U, F>(&self, executor: &Executor, transform: F) -> Future<U>
    where
        U: Transferable,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(executor, move |value| Ok(transform(value)))
    }

    /// Completes with `transform` applied to the success value; a transform
    /// error becomes the failure arm.
    pub fn try_map<U, F>(&self, executor: &Executor, transform: F) -> Future<U>
    where
        U: Transferable,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let promise = Promise::new();
        let weak = promise.downgrade();
        let subscription = self.subscribe(executor, move |result, origin| {
            if let Some(promise) = weak.upgrade() {
                let mapped = result.and_then(|value| transform(value).into());
                promise.try_complete(mapped, Some(origin));
            }
        });
        if let Some(subscription) = subscription {
            promise.release_pool().insert(subscription);
        }
        promise.future()
    }

    /// Chains an asynchronous continuation off the success value.
    ///
    /// Failures skip the continuation and forward unchanged.
    pub fn flat_map<U, F>(&self, executor: &Executor, transform: F) -> Future<U>
    where
        U: Transferable,
        F: Fn(T) -> Future<U> + Send + Sync + 'static,
    {
        let promise = Promise::new();
        let weak = promise.downgrade();
        let subscription = self.subscribe(executor, move |result, origin| {
            let Some(promise) = weak.upgrade() else {
                return;
            };
            match result {
                Fallible::Success(value) => promise.complete_with(&transform(value)),
                Fallible::Failure(error) => {
                    promise.try_complete(Fallible::failure(error), Some(origin));
                }
            }
        });
        if let Some(subscription) = subscription {
            promise.release_pool().insert(subscription);
        }
        promise.future()
    }

    /// Recovers the failure arm into a success.
    pub fn recover<F>(&self, executor: &Executor, transform: F) -> Future<T>
    where
        F: Fn(Error) -> T + Send + Sync + 'static,
    {
        let promise = Promise::new();
        let weak = promise.downgrade();
        let subscription = self.subscribe(executor, move |result, origin| {
            if let Some(promise) = weak.upgrade() {
                let recovered = result.recover(&transform);
                promise.try_complete(Fallible::success(recovered), Some(origin));
            }
        });
        if let Some(subscription) = subscription {
            promise.release_pool().insert(subscription);
        }
        promise.future()
    }

    /// Completes `delay` after this future does, with the same result.
    pub fn delayed(&self, executor: &Executor, delay: Duration) -> Future<T> {
        let promise = Promise::new();
        let weak = promise.downgrade();
        let executor = executor.clone();
        let subscription = self.subscribe(&Executor::immediate(), move |result, _| {
            let weak = match weak.upgrade() {
                Some(promise) => promise.downgrade(),
                None => return,
            };
            executor.execute_after(delay, move |origin| {
                if let Some(promise) = weak.upgrade() {
                    promise.try_complete(result.clone(), Some(origin));
                }
            });
        });
        if let Some(subscription) = subscription {
            promise.release_pool().insert(subscription);
        }
        promise.future()
    }
}

//! Channel combinators.

use crate::channel::{Channel, Event, Producer};
use crate::error::{Error, ErrorKind};
use crate::executor::{Executor, TimerHandle};
use crate::future::{Future, Promise};
use crate::types::{Fallible, Transferable};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Builds a derived channel: a fresh producer fed by a subscription on
/// `source`, with the ownership links described in the
/// [module docs](super).
fn derived<T, S, U, S2, F>(source: &Channel<T, S>, executor: &Executor, forward: F) -> Channel<U, S2>
where
    T: Transferable,
    S: Transferable,
    U: Transferable,
    S2: Transferable,
    F: Fn(Event<T, S>, &Producer<U, S2>, &Executor) + Send + Sync + 'static,
{
    let producer: Producer<U, S2> = Producer::new(source.buffer_capacity());
    let weak = producer.downgrade();
    let subscription = source.subscribe(executor, move |event, origin| {
        if let Some(producer) = weak.upgrade() {
            forward(event, &producer, origin);
        }
    });
    if let Some(subscription) = subscription {
        producer.release_pool().insert(subscription);
    }
    producer.channel()
}

impl<T: Transferable, S: Transferable> Channel<T, S> {
    /// A channel of `transform` applied to every update.
    ///
    /// The terminal completion is forwarded unchanged.
    pub fn map_update<U, F>(&self, executor: &Executor, transform: F) -> Channel<U, S>
    where
        U: Transferable,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        derived(self, executor, move |event, producer, origin| match event {
            Event::Update(update) => producer.send(transform(update), Some(origin)),
            Event::Completed(result) => {
                producer.complete(result, Some(origin));
            }
        })
    }

    /// A channel of the updates passing `predicate`.
    pub fn filter_update<F>(&self, executor: &Executor, predicate: F) -> Channel<T, S>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        derived(self, executor, move |event, producer, origin| match event {
            Event::Update(update) => {
                if predicate(&update) {
                    producer.send(update, Some(origin));
                }
            }
            Event::Completed(result) => {
                producer.complete(result, Some(origin));
            }
        })
    }

    /// A channel that suppresses an update equal to its predecessor.
    pub fn distinct_until_changed(&self, executor: &Executor) -> Channel<T, S>
    where
        T: PartialEq,
    {
        let last: Mutex<Option<T>> = Mutex::new(None);
        derived(self, executor, move |event, producer, origin| match event {
            Event::Update(update) => {
                let mut last = last.lock().expect("distinct state lock poisoned");
                if last.as_ref() != Some(&update) {
                    *last = Some(update.clone());
                    drop(last);
                    producer.send(update, Some(origin));
                }
            }
            Event::Completed(result) => {
                producer.complete(result, Some(origin));
            }
        })
    }

    /// A channel emitting only the last update of every burst: an update is
    /// held back for `interval` and dropped if a newer one arrives first.
    ///
    /// Completion flushes a held-back update before terminating.
    pub fn debounce(&self, executor: &Executor, interval: Duration) -> Channel<T, S> {
        struct DebounceState<T> {
            pending: Option<T>,
            timer: Option<TimerHandle>,
        }

        let state = Arc::new(Mutex::new(DebounceState::<T> {
            pending: None,
            timer: None,
        }));
        let timer_executor = executor.clone();
        derived(self, executor, move |event, producer, origin| match event {
            Event::Update(update) => {
                let mut guard = state.lock().expect("debounce state lock poisoned");
                guard.pending = Some(update);
                if let Some(timer) = guard.timer.take() {
                    timer.cancel();
                }
                let state = Arc::clone(&state);
                let weak = producer.downgrade();
                let handle = timer_executor.execute_after(interval, move |origin| {
                    let flushed = state
                        .lock()
                        .expect("debounce state lock poisoned")
                        .pending
                        .take();
                    if let (Some(update), Some(producer)) = (flushed, weak.upgrade()) {
                        producer.send(update, Some(origin));
                    }
                });
                guard.timer = Some(handle);
            }
            Event::Completed(result) => {
                let flushed = {
                    let mut guard = state.lock().expect("debounce state lock poisoned");
                    if let Some(timer) = guard.timer.take() {
                        timer.cancel();
                    }
                    guard.pending.take()
                };
                if let Some(update) = flushed {
                    producer.send(update, Some(origin));
                }
                producer.complete(result, Some(origin));
            }
        })
    }

    /// Interleaves the updates of two channels of the same update type.
    ///
    /// The merged channel completes with the first terminal event observed
    /// from either source.
    pub fn merge(&self, executor: &Executor, other: &Self) -> Self {
        let producer: Producer<T, S> =
            Producer::new(self.buffer_capacity().max(other.buffer_capacity()));
        for source in [self, other] {
            let weak = producer.downgrade();
            let subscription = source.subscribe(executor, move |event, origin| {
                let Some(producer) = weak.upgrade() else {
                    return;
                };
                match event {
                    Event::Update(update) => producer.send(update, Some(origin)),
                    Event::Completed(result) => {
                        producer.complete(result, Some(origin));
                    }
                }
            });
            if let Some(subscription) = subscription {
                producer.release_pool().insert(subscription);
            }
        }
        producer.channel()
    }

    /// Pairs updates of two channels positionally.
    ///
    /// The zipped channel completes with the first terminal event observed
    /// from either source; unpaired updates are discarded with it.
    pub fn zip<U>(&self, executor: &Executor, other: &Channel<U, S>) -> Channel<(T, U), S>
    where
        U: Transferable,
    {
        struct ZipState<T, U> {
            left: VecDeque<T>,
            right: VecDeque<U>,
        }

        let producer: Producer<(T, U), S> =
            Producer::new(self.buffer_capacity().max(other.buffer_capacity()));
        let state = Arc::new(Mutex::new(ZipState::<T, U> {
            left: VecDeque::new(),
            right: VecDeque::new(),
        }));

        let forward_pairs =
            move |state: &Arc<Mutex<ZipState<T, U>>>, producer: &Producer<(T, U), S>, origin: &Executor| {
                loop {
                    let pair = {
                        let mut guard = state.lock().expect("zip state lock poisoned");
                        if guard.left.is_empty() || guard.right.is_empty() {
                            break;
                        }
                        let left = guard.left.pop_front().expect("left checked non-empty");
                        let right = guard.right.pop_front().expect("right checked non-empty");
                        (left, right)
                    };
                    producer.send(pair, Some(origin));
                }
            };

        {
            let weak = producer.downgrade();
            let state = Arc::clone(&state);
            let forward_pairs = forward_pairs.clone();
            let subscription = self.subscribe(executor, move |event, origin| {
                let Some(producer) = weak.upgrade() else {
                    return;
                };
                match event {
                    Event::Update(update) => {
                        state.lock().expect("zip state lock poisoned").left.push_back(update);
                        forward_pairs(&state, &producer, origin);
                    }
                    Event::Completed(result) => {
                        producer.complete(result, Some(origin));
                    }
                }
            });
            if let Some(subscription) = subscription {
                producer.release_pool().insert(subscription);
            }
        }
        {
            let weak = producer.downgrade();
            let state = Arc::clone(&state);
            let subscription = other.subscribe(executor, move |event, origin| {
                let Some(producer) = weak.upgrade() else {
                    return;
                };
                match event {
                    Event::Update(update) => {
                        state.lock().expect("zip state lock poisoned").right.push_back(update);
                        forward_pairs(&state, &producer, origin);
                    }
                    Event::Completed(result) => {
                        producer.complete(result, Some(origin));
                    }
                }
            });
            if let Some(subscription) = subscription {
                producer.release_pool().insert(subscription);
            }
        }
        producer.channel()
    }

    /// A future of the first update.
    ///
    /// A channel that terminates before emitting fails the future: with the
    /// terminal failure if there was one, otherwise with a user-kind error.
    pub fn first(&self, executor: &Executor) -> Future<T> {
        let promise = Promise::new();
        let weak = promise.downgrade();
        let subscription = self.subscribe(executor, move |event, origin| {
            let Some(promise) = weak.upgrade() else {
                return;
            };
            match event {
                Event::Update(update) => {
                    promise.try_complete(Fallible::success(update), Some(origin));
                }
                Event::Completed(result) => {
                    let error = match result {
                        Fallible::Failure(error) => error,
                        Fallible::Success(_) => Error::new(ErrorKind::User)
                            .with_context("stream completed before its first update"),
                    };
                    promise.try_complete(Fallible::failure(error), Some(origin));
                }
            }
        });
        if let Some(subscription) = subscription {
            promise.release_pool().insert(subscription);
        }
        promise.future()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn collect<T: Transferable>(
        channel: &Channel<T, impl Transferable>,
    ) -> (Arc<Mutex<Vec<T>>>, Option<crate::handler::Subscription>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = channel.on_update(&Executor::immediate(), move |update| {
            sink.lock().expect("seen lock").push(update);
        });
        (seen, sub)
    }

    #[test]
    fn map_update_transforms_in_order() {
        let producer: Producer<i32> = Producer::new(8);
        let doubled = producer.channel().map_update(&Executor::immediate(), |v| v * 2);
        let (seen, _sub) = collect(&doubled);

        producer.send_all([1, 2, 3, 4, 5], None);
        assert_eq!(*seen.lock().expect("seen lock"), vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn map_update_forwards_completion() {
        let producer: Producer<i32, i32> = Producer::new(1);
        let mapped = producer.channel().map_update(&Executor::immediate(), |v| v + 1);
        producer.succeed(5, None);
        assert_eq!(mapped.wait().success_ref(), Some(&5));
    }

    #[test]
    fn filter_update_drops_non_matching() {
        let producer: Producer<i32> = Producer::new(8);
        let evens = producer
            .channel()
            .filter_update(&Executor::immediate(), |v| v % 2 == 0);
        let (seen, _sub) = collect(&evens);

        producer.send_all([1, 2, 3, 4, 5, 6], None);
        assert_eq!(*seen.lock().expect("seen lock"), vec![2, 4, 6]);
    }

    #[test]
    fn distinct_suppresses_consecutive_duplicates() {
        let producer: Producer<i32> = Producer::new(8);
        let distinct = producer.channel().distinct_until_changed(&Executor::immediate());
        let (seen, _sub) = collect(&distinct);

        producer.send_all([1, 1, 2, 2, 2, 1, 3, 3], None);
        assert_eq!(*seen.lock().expect("seen lock"), vec![1, 2, 1, 3]);
    }

    #[test]
    fn merge_interleaves_and_completes_once() {
        let left: Producer<i32, i32> = Producer::new(4);
        let right: Producer<i32, i32> = Producer::new(4);
        let merged = left.channel().merge(&Executor::immediate(), &right.channel());
        let (seen, _sub) = collect(&merged);

        left.send(1, None);
        right.send(2, None);
        left.send(3, None);
        right.succeed(0, None);
        left.send(4, None);

        let seen = seen.lock().expect("seen lock").clone();
        assert!(seen.starts_with(&[1, 2, 3]));
        assert_eq!(merged.wait().success_ref(), Some(&0));
    }

    #[test]
    fn zip_pairs_positionally() {
        let left: Producer<i32, ()> = Producer::new(4);
        let right: Producer<&'static str, ()> = Producer::new(4);
        let zipped = left.channel().zip(&Executor::immediate(), &right.channel());
        let (seen, _sub) = collect(&zipped);

        left.send(1, None);
        left.send(2, None);
        right.send("a", None);
        right.send("b", None);
        left.send(3, None);

        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![(1, "a"), (2, "b")]
        );
    }

    #[test]
    fn first_resolves_on_first_update() {
        let producer: Producer<i32> = Producer::new(0);
        let first = producer.channel().first(&Executor::immediate());

        producer.send(42, None);
        producer.send(43, None);
        assert_eq!(first.wait().success_ref(), Some(&42));
    }

    #[test]
    fn first_fails_on_empty_completion() {
        let producer: Producer<i32> = Producer::new(0);
        let first = producer.channel().first(&Executor::immediate());

        producer.succeed((), None);
        let result = first.wait();
        assert_eq!(
            result.failure_ref().expect("failure expected").kind(),
            ErrorKind::User
        );
    }

    #[test]
    fn debounce_emits_only_trailing_update() {
        let producer: Producer<i32> = Producer::new(0);
        let debounced = producer
            .channel()
            .debounce(&Executor::immediate(), Duration::from_millis(25));
        let (seen, _sub) = collect(&debounced);

        producer.send_all([1, 2, 3], None);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(*seen.lock().expect("seen lock"), vec![3]);

        producer.send(9, None);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(*seen.lock().expect("seen lock"), vec![3, 9]);
    }

    #[test]
    fn debounce_flushes_pending_on_completion() {
        let producer: Producer<i32, i32> = Producer::new(0);
        let debounced = producer
            .channel()
            .debounce(&Executor::immediate(), Duration::from_secs(60));
        let (seen, _sub) = collect(&debounced);

        producer.send(7, None);
        producer.succeed(0, None);
        assert_eq!(*seen.lock().expect("seen lock"), vec![7]);
        assert!(debounced.is_completed());
    }
}

//! Multi-update asynchronous streams.
//!
//! A [`Channel`] is the read handle and a [`Producer`] the read+write handle
//! for a stream that emits zero or more *updates* followed by exactly one
//! terminal *completion*. The head state machine is the single-completion
//! one from [`future`](crate::future) with two additions:
//!
//! - a **bounded replay buffer** of the most recent updates, fixed at
//!   construction, replayed to every new subscriber before live updates;
//! - subscriber events are the two-armed [`Event`] instead of a bare
//!   completion.
//!
//! # Ordering
//!
//! For any single subscriber the delivered sequence is a prefix of the true
//! update stream followed by the terminal completion: no reordering, no
//! skips within its own lane, nothing after the terminal event. Updates and
//! the completion walk serialize on the replay-buffer lock, so a send racing
//! a completion lands on a consistent side of it for every subscriber.
//! Ordering across different subscribers is unspecified.
//!
//! Sends after completion are silent no-ops.

pub mod proxy;

use crate::cancel::{Cancellable, Completable};
use crate::error::Error;
use crate::executor::Executor;
use crate::future::WaitTimedOut;
use crate::handler::{HandlerCore, Link, Subscription};
use crate::head::HeadCell;
use crate::release_pool::ReleasePool;
use crate::tracing_compat::trace;
use crate::types::{Fallible, Transferable};
use smallvec::SmallVec;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

/// Replay-buffer capacity used by [`Producer::default`] and derived
/// channels whose source does not specify one.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1;

/// One delivery to a channel subscriber.
#[derive(Debug, Clone)]
pub enum Event<T, S> {
    /// A stream update.
    Update(T),
    /// The terminal completion.
    Completed(Fallible<S>),
}

struct Buffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Buffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

type FirstSubscribeHook = Box<dyn FnOnce() + Send>;

enum ChannelState<T: Transferable, S: Transferable> {
    Initial {
        on_first: Mutex<Option<FirstSubscribeHook>>,
    },
    Subscribed {
        chain: Option<Arc<Link<Event<T, S>>>>,
    },
    Completed {
        result: Fallible<S>,
    },
}

pub(crate) struct ChannelCore<T: Transferable, S: Transferable> {
    head: HeadCell<ChannelState<T, S>>,
    buffer: Mutex<Buffer<T>>,
    pool: ReleasePool,
}

impl<T: Transferable, S: Transferable> ChannelCore<T, S> {
    fn new(buffer_capacity: usize, on_first: Option<FirstSubscribeHook>) -> Arc<Self> {
        Arc::new(Self {
            head: HeadCell::new(ChannelState::Initial {
                on_first: Mutex::new(on_first),
            }),
            buffer: Mutex::new(Buffer::new(buffer_capacity)),
            pool: ReleasePool::new(),
        })
    }

    fn send(&self, update: T, from: Option<&Executor>) {
        let mut to_schedule: SmallVec<[Arc<HandlerCore<Event<T, S>>>; 4]> = SmallVec::new();
        {
            let mut buffer = self.buffer.lock().expect("channel buffer lock poisoned");
            match &*self.head.load() {
                ChannelState::Completed { .. } => return,
                ChannelState::Initial { .. } => buffer.push(update),
                ChannelState::Subscribed { chain } => {
                    buffer.push(update.clone());
                    for handler in Link::live(chain) {
                        if handler.enqueue(Event::Update(update.clone()), false) {
                            to_schedule.push(handler);
                        }
                    }
                }
            }
        }
        for handler in &to_schedule {
            handler.schedule(from);
        }
    }

    fn complete(&self, result: Fallible<S>, from: Option<&Executor>) -> bool {
        let (old, new) = self.head.update(|state| match state {
            ChannelState::Completed { .. } => None,
            _ => Some(ChannelState::Completed {
                result: result.clone(),
            }),
        });
        if Arc::ptr_eq(&old, &new) {
            return false;
        }
        trace!(failed = result.is_failure(), "channel completed");

        let mut to_schedule: SmallVec<[Arc<HandlerCore<Event<T, S>>>; 4]> = SmallVec::new();
        {
            // Taking the buffer lock serializes this walk against in-flight
            // sends, so no subscriber sees an update after its completion.
            let _buffer = self.buffer.lock().expect("channel buffer lock poisoned");
            if let ChannelState::Subscribed { chain } = &*old {
                for handler in Link::live(chain) {
                    if handler.enqueue(Event::Completed(result.clone()), true) {
                        to_schedule.push(handler);
                    }
                }
            }
        }
        for handler in &to_schedule {
            handler.schedule(from);
        }
        self.pool.drain();
        true
    }
}

impl<T: Transferable, S: Transferable> Completable for ChannelCore<T, S> {
    fn complete_error(&self, error: Error) -> bool {
        self.complete(Fallible::failure(error), None)
    }
}

/// The read handle for a multi-update stream.
///
/// Cheap to clone; clones observe the same stream.
pub struct Channel<T: Transferable, S: Transferable = ()> {
    core: Arc<ChannelCore<T, S>>,
}

impl<T: Transferable, S: Transferable> Clone for Channel<T, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Transferable, S: Transferable> Channel<T, S> {
    /// Registers an event subscriber.
    ///
    /// Buffered updates are replayed, in insertion order, on the
    /// subscriber's executor before any live update. On an already completed
    /// channel the replay is followed by the stored completion and `None` is
    /// returned.
    pub fn subscribe<F>(&self, executor: &Executor, on_event: F) -> Option<Subscription>
    where
        F: Fn(Event<T, S>, &Executor) + Send + Sync + 'static,
    {
        let owner: Arc<dyn Any + Send + Sync> = Arc::clone(&self.core) as _;
        let handler = HandlerCore::new(executor.clone(), owner, on_event);
        let weak = Arc::downgrade(&handler);

        let mut needs_schedule = false;
        let mut hook = None;
        let subscription = {
            let buffer = self.core.buffer.lock().expect("channel buffer lock poisoned");
            let (old, new) = self.core.head.update(|state| match state {
                ChannelState::Completed { .. } => None,
                ChannelState::Initial { .. } => Some(ChannelState::Subscribed {
                    chain: Link::push(&None, weak.clone()),
                }),
                ChannelState::Subscribed { chain } => Some(ChannelState::Subscribed {
                    chain: Link::push(chain, weak.clone()),
                }),
            });

            for item in buffer.iter() {
                if handler.enqueue(Event::Update(item.clone()), false) {
                    needs_schedule = true;
                }
            }
            if Arc::ptr_eq(&old, &new) {
                if let ChannelState::Completed { result } = &*old {
                    if handler.enqueue(Event::Completed(result.clone()), true) {
                        needs_schedule = true;
                    }
                }
                None
            } else {
                if let ChannelState::Initial { on_first } = &*old {
                    hook = on_first.lock().expect("lazy-start lock poisoned").take();
                }
                Some(Subscription::new(Arc::clone(&handler)))
            }
        };
        if needs_schedule {
            handler.schedule(None);
        }
        if let Some(hook) = hook {
            hook();
        }
        subscription
    }

    /// Registers a subscriber for updates only.
    pub fn on_update<F>(&self, executor: &Executor, block: F) -> Option<Subscription>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(executor, move |event, _| {
            if let Event::Update(update) = event {
                block(update);
            }
        })
    }

    /// Registers a subscriber for the terminal completion only.
    pub fn on_completion<F>(&self, executor: &Executor, block: F) -> Option<Subscription>
    where
        F: Fn(Fallible<S>) + Send + Sync + 'static,
    {
        self.subscribe(executor, move |event, _| {
            if let Event::Completed(result) = event {
                block(result);
            }
        })
    }

    /// Returns the terminal completion, if the channel has completed.
    #[must_use]
    pub fn completion(&self) -> Option<Fallible<S>> {
        match &*self.core.head.load() {
            ChannelState::Completed { result } => Some(result.clone()),
            _ => None,
        }
    }

    /// Returns true once the channel has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(&*self.core.head.load(), ChannelState::Completed { .. })
    }

    /// Snapshot of the replay buffer, oldest first.
    #[must_use]
    pub fn buffered(&self) -> Vec<T> {
        self.core
            .buffer
            .lock()
            .expect("channel buffer lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// The replay-buffer capacity fixed at construction.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.core
            .buffer
            .lock()
            .expect("channel buffer lock poisoned")
            .capacity
    }

    /// Blocks the calling thread until the terminal completion.
    pub fn wait(&self) -> Fallible<S> {
        match self.wait_internal(None) {
            Ok(result) => result,
            Err(WaitTimedOut) => unreachable!("untimed wait cannot time out"),
        }
    }

    /// Blocks until the terminal completion or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimedOut`] if the deadline passes first.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> core::result::Result<Fallible<S>, WaitTimedOut> {
        self.wait_internal(Some(timeout))
    }

    fn wait_internal(
        &self,
        timeout: Option<Duration>,
    ) -> core::result::Result<Fallible<S>, WaitTimedOut> {
        struct WaitCell<S> {
            slot: Mutex<Option<Fallible<S>>>,
            condvar: Condvar,
        }

        let cell = Arc::new(WaitCell {
            slot: Mutex::new(None),
            condvar: Condvar::new(),
        });
        let signal = Arc::clone(&cell);
        let _subscription = self.on_completion(&Executor::immediate(), move |result| {
            *signal.slot.lock().expect("wait slot lock poisoned") = Some(result);
            signal.condvar.notify_all();
        });

        let mut slot = cell.slot.lock().expect("wait slot lock poisoned");
        match timeout {
            None => {
                while slot.is_none() {
                    slot = cell.condvar.wait(slot).expect("wait slot lock poisoned");
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

impl<T: Transferable, S: Transferable> std::fmt::Debug for Channel<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.core.head.load() {
            ChannelState::Initial { .. } => "initial",
            ChannelState::Subscribed { .. } => "subscribed",
            ChannelState::Completed { .. } => "completed",
        };
        f.debug_struct("Channel").field("state", &state).finish()
    }
}

/// The read+write handle for a multi-update stream.
///
/// Derefs to its [`Channel`] read surface.
pub struct Producer<T: Transferable, S: Transferable = ()> {
    channel: Channel<T, S>,
}

impl<T: Transferable, S: Transferable> Clone for Producer<T, S> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T: Transferable, S: Transferable> Producer<T, S> {
    /// Creates a producer with the given replay-buffer capacity.
    #[must_use]
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            channel: Channel {
                core: ChannelCore::new(buffer_capacity, None),
            },
        }
    }

    /// Creates a producer whose hook runs on the first subscription.
    ///
    /// Used by bridges that start observing an external source only once
    /// someone is listening.
    #[must_use]
    pub fn new_lazy(
        buffer_capacity: usize,
        on_first_subscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: Channel {
                core: ChannelCore::new(buffer_capacity, Some(Box::new(on_first_subscribe))),
            },
        }
    }

    /// Returns a read handle.
    #[must_use]
    pub fn channel(&self) -> Channel<T, S> {
        self.channel.clone()
    }

    /// Emits one update to the buffer and every live subscriber.
    ///
    /// Silent no-op after completion.
    pub fn send(&self, update: T, from: Option<&Executor>) {
        self.channel.core.send(update, from);
    }

    /// Emits each update in order.
    pub fn send_all<I: IntoIterator<Item = T>>(&self, updates: I, from: Option<&Executor>) {
        for update in updates {
            self.send(update, from);
        }
    }

    /// Terminates the stream.
    ///
    /// Returns true if this call performed the completion. All further
    /// sends are no-ops.
    pub fn complete(&self, result: Fallible<S>, from: Option<&Executor>) -> bool {
        self.channel.core.complete(result, from)
    }

    /// Terminates with a success. Returns false if already completed.
    pub fn succeed(&self, value: S, from: Option<&Executor>) -> bool {
        self.complete(Fallible::success(value), from)
    }

    /// Terminates with a failure. Returns false if already completed.
    pub fn fail(&self, error: Error, from: Option<&Executor>) -> bool {
        self.complete(Fallible::failure(error), from)
    }

    /// The producer's release pool, drained when the stream completes.
    #[must_use]
    pub fn release_pool(&self) -> &ReleasePool {
        &self.channel.core.pool
    }

    /// A weak completable reference for context-dependent registration.
    #[must_use]
    pub fn completable(&self) -> Weak<dyn Completable> {
        let weak: Weak<ChannelCore<T, S>> = Arc::downgrade(&self.channel.core);
        weak
    }

    pub(crate) fn downgrade(&self) -> WeakProducer<T, S> {
        WeakProducer {
            core: Arc::downgrade(&self.channel.core),
        }
    }
}

impl<T: Transferable, S: Transferable> Default for Producer<T, S> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl<T: Transferable, S: Transferable> std::ops::Deref for Producer<T, S> {
    type Target = Channel<T, S>;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl<T: Transferable, S: Transferable> Cancellable for Producer<T, S> {
    fn cancel(&self) {
        self.fail(Error::cancelled(), None);
    }
}

impl<T: Transferable, S: Transferable> Completable for Producer<T, S> {
    fn complete_error(&self, error: Error) -> bool {
        self.fail(error, None)
    }
}

impl<T: Transferable, S: Transferable> std::fmt::Debug for Producer<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("channel", &self.channel)
            .finish()
    }
}

/// A weak producer used by forwarding closures so derived streams do not
/// keep themselves alive.
pub(crate) struct WeakProducer<T: Transferable, S: Transferable> {
    core: Weak<ChannelCore<T, S>>,
}

impl<T: Transferable, S: Transferable> WeakProducer<T, S> {
    pub(crate) fn upgrade(&self) -> Option<Producer<T, S>> {
        self.core.upgrade().map(|core| Producer {
            channel: Channel { core },
        })
    }
}

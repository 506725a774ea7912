//! Per-subscription handler records.
//!
//! A handler carries the subscriber's executor, its callback, and a
//! clearable strong back-reference to the producer it observes. The producer
//! side reaches handlers only through weak links, so a subscriber that drops
//! its [`Subscription`] simply leaves a dead slot behind, skipped on the
//! next walk.
//!
//! Delivery goes through a small mailbox (queue plus a scheduled flag)
//! rather than one executor dispatch per event. This serializes each
//! subscriber's lane: a single subscriber observes events in production
//! order even when its executor is backed by a concurrent pool.

use crate::executor::Executor;
use crossbeam_queue::SegQueue;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

type EventBlock<E> = Box<dyn Fn(E, &Executor) + Send + Sync>;

/// The shared core of one subscription.
///
/// Held weakly by the producer's subscriber chain and strongly by the
/// consumer's [`Subscription`] (and, transiently, by in-flight dispatches).
pub(crate) struct HandlerCore<E> {
    executor: Executor,
    block: EventBlock<E>,
    /// Strong back-reference keeping the observed producer alive while this
    /// handler is. Cleared after the terminal event so that the cycle
    /// handler → producer → chain → handler is broken.
    owner: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    /// Pending events, each tagged with whether it is terminal.
    mailbox: SegQueue<(E, bool)>,
    /// Whether a drain is queued on the executor.
    scheduled: AtomicBool,
    /// Set after the terminal event has been handled; later events are
    /// dropped without invoking the block.
    terminated: AtomicBool,
}

impl<E: Send + 'static> HandlerCore<E> {
    pub(crate) fn new(
        executor: Executor,
        owner: Arc<dyn Any + Send + Sync>,
        block: impl Fn(E, &Executor) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            block: Box::new(block),
            owner: Mutex::new(Some(owner)),
            mailbox: SegQueue::new(),
            scheduled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        })
    }

    /// Queues one event for delivery.
    ///
    /// Returns true when the caller has claimed scheduling and must follow
    /// up with [`schedule`](Self::schedule) once it is safe to dispatch
    /// (i.e. outside any producer-side lock).
    pub(crate) fn enqueue(&self, event: E, terminal: bool) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            return false;
        }
        self.mailbox.push((event, terminal));
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Dispatches a mailbox drain through the handler's executor.
    pub(crate) fn schedule(self: &Arc<Self>, from: Option<&Executor>) {
        let me = Arc::clone(self);
        self.executor.execute(from, move |origin| me.drain(origin));
    }

    fn drain(&self, origin: &Executor) {
        loop {
            while let Some((event, terminal)) = self.mailbox.pop() {
                if self.terminated.load(Ordering::Acquire) {
                    continue;
                }
                (self.block)(event, origin);
                if terminal {
                    self.terminated.store(true, Ordering::Release);
                    self.release_owner();
                }
            }
            self.scheduled.store(false, Ordering::Release);
            // Re-claim if an enqueue slipped in between the final pop and
            // the flag reset; otherwise the race loser schedules.
            if self.mailbox.is_empty() || self.scheduled.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }

    /// Clears the strong producer back-reference.
    pub(crate) fn release_owner(&self) {
        self.owner.lock().expect("handler owner lock poisoned").take();
    }

    fn detach(&self) {
        self.terminated.store(true, Ordering::Release);
        self.release_owner();
    }
}

/// One link of a producer's subscriber chain.
///
/// The chain is a persistent singly-linked stack: pushing a subscriber
/// builds a new link pointing at the previous chain, so a chain snapshot is
/// immutable and safe to walk without locks.
pub(crate) struct Link<E> {
    pub(crate) handler: Weak<HandlerCore<E>>,
    pub(crate) next: Option<Arc<Link<E>>>,
}

impl<E> Link<E> {
    /// Builds a chain with `handler` on top, dropping links whose handlers
    /// are gone.
    pub(crate) fn push(
        chain: &Option<Arc<Self>>,
        handler: Weak<HandlerCore<E>>,
    ) -> Option<Arc<Self>> {
        let mut live = Vec::new();
        let mut cursor = chain.as_ref();
        while let Some(link) = cursor {
            if link.handler.strong_count() > 0 {
                live.push(link.handler.clone());
            }
            cursor = link.next.as_ref();
        }
        let mut rebuilt = None;
        for slot in live.into_iter().rev() {
            rebuilt = Some(Arc::new(Self {
                handler: slot,
                next: rebuilt,
            }));
        }
        Some(Arc::new(Self {
            handler,
            next: rebuilt,
        }))
    }

    /// Upgrades every live handler in the chain, oldest first.
    pub(crate) fn live(chain: &Option<Arc<Self>>) -> smallvec::SmallVec<[Arc<HandlerCore<E>>; 4]> {
        let mut handlers = smallvec::SmallVec::new();
        let mut cursor = chain.as_ref();
        while let Some(link) = cursor {
            if let Some(handler) = link.handler.upgrade() {
                handlers.push(handler);
            }
            cursor = link.next.as_ref();
        }
        handlers.reverse();
        handlers
    }
}

trait Detach: Send + Sync {
    fn detach(&self);
}

impl<E: Send + 'static> Detach for HandlerCore<E> {
    fn detach(&self) {
        Self::detach(self);
    }
}

/// The consumer-held half of a subscription.
///
/// Holding it keeps the handler (and, through the handler's owner link, the
/// observed producer) alive. Dropping it leaves a dead weak slot that the
/// next producer-side walk skips; [`unsubscribe`](Self::unsubscribe) stops
/// delivery immediately instead.
#[must_use = "dropping the subscription detaches the subscriber"]
pub struct Subscription {
    inner: Arc<dyn Detach>,
}

impl Subscription {
    pub(crate) fn new<E: Send + 'static>(handler: Arc<HandlerCore<E>>) -> Self {
        Self { inner: handler }
    }

    /// Stops delivery and releases the producer back-reference.
    pub fn unsubscribe(&self) {
        self.inner.detach();
    }
}

impl crate::cancel::Cancellable for Subscription {
    fn cancel(&self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop_owner() -> Arc<dyn Any + Send + Sync> {
        Arc::new(())
    }

    #[test]
    fn events_are_delivered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let handler = HandlerCore::new(Executor::immediate(), noop_owner(), move |event: u32, _| {
            seen2.lock().expect("seen lock").push(event);
        });

        for i in 0..5 {
            if handler.enqueue(i, false) {
                handler.schedule(None);
            }
        }
        assert_eq!(*seen.lock().expect("seen lock"), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn nothing_is_delivered_after_terminal_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let handler = HandlerCore::new(Executor::immediate(), noop_owner(), move |_: u32, _| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handler.enqueue(1, true));
        handler.schedule(None);
        assert!(!handler.enqueue(2, false));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminal_event_clears_owner() {
        let owner = Arc::new(42u32);
        let weak_owner = Arc::downgrade(&owner);
        let handler = HandlerCore::new(
            Executor::immediate(),
            owner as Arc<dyn Any + Send + Sync>,
            |_: u32, _| {},
        );
        assert!(weak_owner.upgrade().is_some());

        assert!(handler.enqueue(0, true));
        handler.schedule(None);
        assert!(weak_owner.upgrade().is_none());
    }

    #[test]
    fn unsubscribed_handler_stops_delivery() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let handler = HandlerCore::new(Executor::immediate(), noop_owner(), move |_: u32, _| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let subscription = Subscription::new(Arc::clone(&handler));
        subscription.unsubscribe();

        assert!(!handler.enqueue(1, false));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn chain_push_drops_dead_slots() {
        let keep = HandlerCore::new(Executor::immediate(), noop_owner(), |_: u32, _| {});
        let dead = HandlerCore::new(Executor::immediate(), noop_owner(), |_: u32, _| {});

        let chain = Link::push(&None, Arc::downgrade(&keep));
        let chain = Link::push(&chain, Arc::downgrade(&dead));
        drop(dead);
        let newest = HandlerCore::new(Executor::immediate(), noop_owner(), |_: u32, _| {});
        let chain = Link::push(&chain, Arc::downgrade(&newest));

        assert_eq!(Link::live(&chain).len(), 2);
    }
}

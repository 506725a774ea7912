//! Two-way binding producers.
//!
//! A [`ProducerProxy`] fronts an external mutable source (a host-object
//! property behind an observation bridge, a settings store, a widget): the
//! stream side shows its changes, and writes coming from downstream are
//! forwarded into a setter instead of straight into the stream. The
//! external observation mechanism is a collaborator, not part of this
//! crate; it feeds the proxy through
//! [`handle_external`](ProducerProxy::handle_external) or
//! [`update_without_handling`](ProducerProxy::update_without_handling) and
//! receives downstream writes through the setter it supplied.
//!
//! A one-way binding needs no proxy: the bridge just owns a plain
//! [`Producer<Option<T>>`](super::Producer) and sends into it.
//!
//! # Feedback loops
//!
//! A setter that synchronously reports the change back to the proxy would
//! loop forever. A flag bit guards this: while the proxy is emitting to
//! subscribers, [`update`](ProducerProxy::update) drops the write instead
//! of re-entering the setter.

use super::{Channel, Producer};
use crate::cancel::{Cancellable, Completable};
use crate::error::Error;
use crate::executor::Executor;
use crate::types::{Fallible, Transferable};
use std::sync::atomic::{AtomicBool, Ordering};

/// What to do when the external source reports an absent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonePolicy {
    /// Drop the event.
    Skip,
    /// Substitute `T::default()`.
    ReplaceWithDefault,
}

/// A channel producer with a typed "set from downstream" callback.
pub struct ProducerProxy<T: Transferable, S: Transferable = ()> {
    producer: Producer<T, S>,
    setter: Box<dyn Fn(T) + Send + Sync>,
    none_policy: NonePolicy,
    /// Set while emitting to subscribers; guards against synchronous
    /// feedback through the setter.
    forwarding: AtomicBool,
}

impl<T: Transferable, S: Transferable> ProducerProxy<T, S> {
    /// Creates a proxy with the given replay-buffer capacity and downstream
    /// setter.
    #[must_use]
    pub fn new(
        buffer_capacity: usize,
        none_policy: NonePolicy,
        setter: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            producer: Producer::new(buffer_capacity),
            setter: Box::new(setter),
            none_policy,
            forwarding: AtomicBool::new(false),
        }
    }

    /// Returns the read handle of the proxied stream.
    #[must_use]
    pub fn channel(&self) -> Channel<T, S> {
        self.producer.channel()
    }

    /// Accepts a write from downstream.
    ///
    /// Forwards the value into the setter; the stream side updates when the
    /// external source reports the change back. Dropped silently while the
    /// proxy is emitting, breaking synchronous feedback loops.
    pub fn update(&self, value: T, _from: Option<&Executor>) {
        if self.forwarding.load(Ordering::Acquire) {
            return;
        }
        (self.setter)(value);
    }

    /// Sets the stored value and emits an update to subscribers without
    /// re-entering the setter that originated it.
    pub fn update_without_handling(&self, value: T, from: Option<&Executor>) {
        self.forwarding.store(true, Ordering::Release);
        self.producer.send(value, from);
        self.forwarding.store(false, Ordering::Release);
    }

    /// Terminates the proxied stream.
    pub fn complete(&self, result: Fallible<S>, from: Option<&Executor>) -> bool {
        self.producer.complete(result, from)
    }
}

impl<T: Transferable + Default, S: Transferable> ProducerProxy<T, S> {
    /// Accepts a possibly absent value from the external source, applying
    /// the proxy's none-handling policy.
    pub fn handle_external(&self, value: Option<T>, from: Option<&Executor>) {
        match value {
            Some(value) => self.update_without_handling(value, from),
            None => match self.none_policy {
                NonePolicy::Skip => {}
                NonePolicy::ReplaceWithDefault => {
                    self.update_without_handling(T::default(), from);
                }
            },
        }
    }
}

impl<T: Transferable, S: Transferable> Cancellable for ProducerProxy<T, S> {
    fn cancel(&self) {
        self.producer.cancel();
    }
}

impl<T: Transferable, S: Transferable> Completable for ProducerProxy<T, S> {
    fn complete_error(&self, error: Error) -> bool {
        self.producer.complete_error(error)
    }
}

impl<T: Transferable, S: Transferable> std::fmt::Debug for ProducerProxy<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerProxy")
            .field("producer", &self.producer)
            .field("none_policy", &self.none_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn downstream_update_goes_through_setter() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let written2 = Arc::clone(&written);
        let proxy: ProducerProxy<i32> = ProducerProxy::new(1, NonePolicy::Skip, move |v| {
            written2.lock().expect("written lock").push(v);
        });

        proxy.update(5, None);
        assert_eq!(*written.lock().expect("written lock"), vec![5]);
    }

    #[test]
    fn external_update_reaches_subscribers_not_setter() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let written2 = Arc::clone(&written);
        let proxy: ProducerProxy<i32> = ProducerProxy::new(1, NonePolicy::Skip, move |v| {
            written2.lock().expect("written lock").push(v);
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let _sub = proxy.channel().on_update(&Executor::immediate(), move |v| {
            seen2.lock().expect("seen lock").push(v);
        });

        proxy.update_without_handling(7, None);
        assert_eq!(*seen.lock().expect("seen lock"), vec![7]);
        assert!(written.lock().expect("written lock").is_empty());
    }

    #[test]
    fn synchronous_feedback_is_broken() {
        // A subscriber that immediately writes every update back downstream.
        let proxy: Arc<ProducerProxy<i32>> = Arc::new(ProducerProxy::new(
            1,
            NonePolicy::Skip,
            |_| { /* external write */ },
        ));
        let loopback = Arc::clone(&proxy);
        let count = Arc::new(Mutex::new(0));
        let count2 = Arc::clone(&count);
        let _sub = proxy.channel().on_update(&Executor::immediate(), move |v| {
            *count2.lock().expect("count lock") += 1;
            loopback.update(v, None);
        });

        proxy.update_without_handling(1, None);
        assert_eq!(*count.lock().expect("count lock"), 1);
    }

    #[test]
    fn none_policy_skip_drops_absent_values() {
        let proxy: ProducerProxy<i32> = ProducerProxy::new(1, NonePolicy::Skip, |_| {});
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let _sub = proxy.channel().on_update(&Executor::immediate(), move |v| {
            seen2.lock().expect("seen lock").push(v);
        });

        proxy.handle_external(Some(1), None);
        proxy.handle_external(None, None);
        proxy.handle_external(Some(2), None);
        assert_eq!(*seen.lock().expect("seen lock"), vec![1, 2]);
    }

    #[test]
    fn none_policy_default_substitutes() {
        let proxy: ProducerProxy<i32> = ProducerProxy::new(1, NonePolicy::ReplaceWithDefault, |_| {});
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let _sub = proxy.channel().on_update(&Executor::immediate(), move |v| {
            seen2.lock().expect("seen lock").push(v);
        });

        proxy.handle_external(Some(1), None);
        proxy.handle_external(None, None);
        assert_eq!(*seen.lock().expect("seen lock"), vec![1, 0]);
    }
}

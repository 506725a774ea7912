//! Cancellation tokens and the cancellation protocol.
//!
//! Cancellation flows one way: a token (or a dying execution context) causes
//! a producer to complete with a cancellation failure. Consumers cannot
//! cancel upstream work by merely dropping a subscription; they hold a
//! cancellable and cancel it explicitly, or attach it to a token.

use crate::error::Error;
use crate::tracing_compat::trace;
use std::sync::{Arc, Mutex};

/// Something that can be cancelled exactly once.
///
/// Implemented by promises, producers, timer handles, subscriptions, and
/// tokens themselves (so tokens nest).
pub trait Cancellable: Send + Sync {
    /// Requests cancellation. Idempotent.
    fn cancel(&self);
}

/// Something that can be completed with a failure from the outside.
///
/// Execution contexts hold their dependents through this trait so a dying
/// context can fail them with a context-dropped error rather than a plain
/// cancellation.
pub trait Completable: Send + Sync {
    /// Completes the value with the given failure.
    ///
    /// Returns true if this call performed the completion, false if the
    /// value had already completed.
    fn complete_error(&self, error: Error) -> bool;
}

enum TokenState {
    Active { members: Vec<Arc<dyn Cancellable>> },
    Cancelled,
}

/// A fan-out cancellation signal.
///
/// A token collects cancellables and cancels them all when [`cancel`] is
/// called. The flag is monotonic: adding a cancellable to an already
/// cancelled token cancels it immediately.
///
/// Registered members are held strongly until the token fires or is
/// dropped: attaching a pending promise to a token is enough to keep it
/// alive for the duration.
///
/// [`cancel`]: CancelToken::cancel
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Mutex<TokenState>>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TokenState::Active {
                members: Vec::new(),
            })),
        }
    }

    /// Registers a cancellable with this token.
    ///
    /// If the token has already been cancelled the member is cancelled
    /// immediately, on the calling thread.
    pub fn add(&self, member: Arc<dyn Cancellable>) {
        {
            let mut state = self.inner.lock().expect("cancel token lock poisoned");
            if let TokenState::Active { members } = &mut *state {
                members.push(member);
                return;
            }
        }
        member.cancel();
    }

    /// Cancels every registered member, then every member added later.
    ///
    /// Idempotent; members are cancelled exactly once. Member callbacks run
    /// outside the token lock, so they are free to interact with the token.
    pub fn cancel(&self) {
        let members = {
            let mut state = self.inner.lock().expect("cancel token lock poisoned");
            match std::mem::replace(&mut *state, TokenState::Cancelled) {
                TokenState::Active { members } => members,
                TokenState::Cancelled => return,
            }
        };
        trace!(members = members.len(), "cancel token fired");
        for member in members {
            member.cancel();
        }
    }

    /// Returns true once the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.inner.lock().expect("cancel token lock poisoned"),
            TokenState::Cancelled
        )
    }

    /// Creates a child token that is cancelled together with this one.
    ///
    /// Cancelling the child does not affect the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        self.add(Arc::new(child.clone()));
        child
    }
}

impl Cancellable for CancelToken {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

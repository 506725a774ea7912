//! One-shot keep-alive container.
//!
//! Every promise and producer owns a release pool. Anything inserted stays
//! alive until the pool is drained, which happens exactly once, from the
//! completion walk. Dropping the keep-alives there is what severs the
//! retainer cycles a subscription graph naturally builds up (handler → owner
//! → subscriber list → handler).

use std::any::Any;
use std::sync::Mutex;

enum PoolState {
    Open {
        items: Vec<Box<dyn Any + Send>>,
        on_drain: Vec<Box<dyn FnOnce() + Send>>,
    },
    Drained,
}

/// A set-like container of keep-alive handles plus drain callbacks.
///
/// Insertions after the drain are released immediately; drain callbacks
/// registered after the drain run immediately. The drain itself is one-shot.
pub struct ReleasePool {
    state: Mutex<PoolState>,
}

impl ReleasePool {
    /// Creates an empty, undrained pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::Open {
                items: Vec::new(),
                on_drain: Vec::new(),
            }),
        }
    }

    /// Keeps `item` alive until the pool drains.
    ///
    /// No-op (the item is dropped on the spot) if the pool has already
    /// drained.
    pub fn insert<R: Send + 'static>(&self, item: R) {
        let mut state = self.state.lock().expect("release pool lock poisoned");
        if let PoolState::Open { items, .. } = &mut *state {
            items.push(Box::new(item));
        }
    }

    /// Schedules `callback` to run at drain time.
    ///
    /// Runs immediately if the pool has already drained.
    pub fn notify_drain(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.state.lock().expect("release pool lock poisoned");
            if let PoolState::Open { on_drain, .. } = &mut *state {
                on_drain.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Releases all inserted items, then runs drain callbacks in insertion
    /// order. Second and later calls are no-ops.
    pub fn drain(&self) {
        let drained = {
            let mut state = self.state.lock().expect("release pool lock poisoned");
            std::mem::replace(&mut *state, PoolState::Drained)
        };
        if let PoolState::Open { items, on_drain } = drained {
            drop(items);
            for callback in on_drain {
                callback();
            }
        }
    }

    /// Returns true once the pool has been drained.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        matches!(
            *self.state.lock().expect("release pool lock poisoned"),
            PoolState::Drained
        )
    }
}

impl Default for ReleasePool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReleasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasePool")
            .field("drained", &self.is_drained())
            .finish()
    }
}

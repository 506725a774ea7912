//! Atomically swapped head container.
//!
//! Every asynchronous value keeps its entire mutable state behind a single
//! head pointer. State nodes are immutable once published; a transition
//! builds a fresh node and installs it with a compare-and-swap retry loop.
//! Transforms must therefore be pure with respect to shared state (they may
//! be re-evaluated on contention), and all side effects (notifying
//! subscribers, draining release pools) happen after the swap commits, keyed
//! off whether the head actually changed.
//!
//! This is the single synchronization point for the whole library.

use arc_swap::{ArcSwap, Guard};
use std::sync::Arc;

/// A compare-and-swap cell over an immutable state node.
pub(crate) struct HeadCell<S> {
    head: ArcSwap<S>,
}

impl<S> HeadCell<S> {
    /// Creates a cell holding the given initial state.
    pub(crate) fn new(initial: S) -> Self {
        Self {
            head: ArcSwap::from_pointee(initial),
        }
    }

    /// Returns the current head.
    pub(crate) fn load(&self) -> Arc<S> {
        self.head.load_full()
    }

    /// Applies `transform` to the head under a compare-and-swap retry loop.
    ///
    /// `transform` returns `None` to leave the head untouched, or the desired
    /// replacement node. Returns `(old, new)`; callers detect a committed
    /// transition with `!Arc::ptr_eq(&old, &new)`.
    pub(crate) fn update<F>(&self, transform: F) -> (Arc<S>, Arc<S>)
    where
        F: Fn(&S) -> Option<S>,
    {
        let mut current = self.head.load_full();
        loop {
            let Some(next) = transform(&current) else {
                return (Arc::clone(&current), current);
            };
            let next = Arc::new(next);
            let previous = self.head.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*previous, &current) {
                return (current, next);
            }
            current = Guard::into_inner(previous);
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for HeadCell<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadCell").field("head", &self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn update_installs_new_state() {
        let cell = HeadCell::new(1u32);
        let (old, new) = cell.update(|v| Some(v + 1));
        assert_eq!(*old, 1);
        assert_eq!(*new, 2);
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(*cell.load(), 2);
    }

    #[test]
    fn none_leaves_head_untouched() {
        let cell = HeadCell::new(7u32);
        let before = cell.load();
        let (old, new) = cell.update(|_| None);
        assert!(Arc::ptr_eq(&old, &new));
        assert!(Arc::ptr_eq(&before, &new));
    }

    #[test]
    fn contended_updates_all_commit() {
        let cell = Arc::new(HeadCell::new(0usize));
        let retries = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let retries = Arc::clone(&retries);
                thread::spawn(move || {
                    for _ in 0..100 {
                        cell.update(|v| {
                            retries.fetch_add(1, Ordering::Relaxed);
                            Some(v + 1)
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker should not panic");
        }

        assert_eq!(*cell.load(), 800);
        // Transforms may have been re-evaluated, never lost.
        assert!(retries.load(Ordering::Relaxed) >= 800);
    }
}

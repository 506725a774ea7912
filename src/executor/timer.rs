//! Delayed dispatch.
//!
//! A single driver thread owns a deadline heap. Executors push entries via
//! [`Executor::execute_after`](super::Executor::execute_after); at each
//! deadline the driver hands the job back to the originating executor.
//! Cancellation is a flag checked at fire time, so a cancelled entry costs
//! nothing beyond its slot in the heap.

use super::Task;
use crate::cancel::Cancellable;
use crate::tracing_compat::{trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Cancels a pending delayed dispatch.
///
/// Cloneable; all clones control the same entry. Cancelling after the block
/// has started running has no effect.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Marks the pending dispatch as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if the dispatch has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Cancellable for TimerHandle {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(crate) struct TimerDriver {
    heap: Mutex<BinaryHeap<Entry>>,
    condvar: Condvar,
    seq: AtomicU64,
}

impl TimerDriver {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Registers `job` to run after `delay` on the driver thread.
    pub(crate) fn schedule(&self, delay: Duration, job: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            cancelled: Arc::clone(&cancelled),
            job,
        };
        self.heap.lock().push(entry);
        self.condvar.notify_one();
        TimerHandle { cancelled }
    }

    fn run(&self) {
        let mut heap = self.heap.lock();
        loop {
            let next_deadline = heap.peek().map(|entry| entry.deadline);
            match next_deadline {
                None => self.condvar.wait(&mut heap),
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        if let Some(entry) = heap.pop() {
                            MutexGuard::unlocked(&mut heap, || fire(entry));
                        }
                    } else {
                        let _ = self.condvar.wait_for(&mut heap, deadline - now);
                    }
                }
            }
        }
    }
}

fn fire(entry: Entry) {
    if entry.cancelled.load(Ordering::Acquire) {
        trace!("timer entry skipped, cancelled before deadline");
        return;
    }
    trace!("timer entry fired");
    let job = entry.job;
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        warn!("timer block panicked; panic contained to that entry");
    }
}

static DRIVER: OnceLock<&'static TimerDriver> = OnceLock::new();

/// The global timer driver, started on first use.
pub(crate) fn shared() -> &'static TimerDriver {
    DRIVER.get_or_init(|| {
        let driver: &'static TimerDriver = Box::leak(Box::new(TimerDriver::new()));
        thread::Builder::new()
            .name("rivulet-timer".to_string())
            .spawn(move || driver.run())
            .expect("failed to spawn timer driver");
        driver
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn entries_fire_in_deadline_order() {
        let driver = shared();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let seen_late = Arc::clone(&seen);
        driver.schedule(
            Duration::from_millis(60),
            Box::new(move || seen_late.lock().expect("seen lock").push("late")),
        );
        let seen_early = Arc::clone(&seen);
        driver.schedule(
            Duration::from_millis(20),
            Box::new(move || seen_early.lock().expect("seen lock").push("early")),
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().expect("seen lock").len() < 2 {
            assert!(Instant::now() < deadline, "entries never fired");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*seen.lock().expect("seen lock"), vec!["early", "late"]);
    }

    #[test]
    fn cancelled_entry_is_skipped() {
        let driver = shared();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        let handle = driver.schedule(
            Duration::from_millis(20),
            Box::new(move || fired2.store(true, Ordering::SeqCst)),
        );
        handle.cancel();
        assert!(handle.is_cancelled());
        thread::sleep(Duration::from_millis(60));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn zero_delay_fires_promptly() {
        let driver = shared();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        driver.schedule(
            Duration::ZERO,
            Box::new(move || fired2.store(true, Ordering::SeqCst)),
        );
        let deadline = Instant::now() + Duration::from_secs(2);
        while !fired.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "zero-delay entry never fired");
            thread::yield_now();
        }
    }
}

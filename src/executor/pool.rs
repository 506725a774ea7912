//! Shared worker pools backing the priority lanes.
//!
//! One pool per [`Lane`], created lazily on first use. Threads are spawned
//! on demand up to the configured maximum and retire after sitting idle
//! beyond the idle timeout, so an application that never touches a lane
//! pays nothing for it.
//!
//! A panicking block is caught and logged; it never takes a worker (or a
//! sibling subscriber's delivery) down with it.

use super::{Lane, Task};
use crate::tracing_compat::{debug, warn};
use crossbeam_queue::SegQueue;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

/// Default idle timeout before retiring a worker.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a lane pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of worker threads.
    pub max_threads: usize,
    /// How long a worker may sit idle before retiring.
    pub idle_timeout: Duration,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_threads: default_parallelism(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "rivulet-worker".to_string(),
        }
    }
}

impl PoolOptions {
    fn for_lane(lane: Lane) -> Self {
        let parallelism = default_parallelism();
        let max_threads = match lane {
            Lane::Background => (parallelism / 2).max(1),
            _ => parallelism,
        };
        Self {
            max_threads,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: format!("rivulet-{}", lane.name()),
        }
    }
}

fn default_parallelism() -> usize {
    thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

struct PoolInner {
    max_threads: usize,
    active_threads: AtomicUsize,
    idle_threads: AtomicUsize,
    next_worker_id: AtomicUsize,
    queue: SegQueue<Task>,
    mutex: Mutex<()>,
    condvar: Condvar,
    idle_timeout: Duration,
    thread_name_prefix: String,
}

/// A lazily scaled worker pool.
pub(crate) struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub(crate) fn new(options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                max_threads: options.max_threads.max(1),
                active_threads: AtomicUsize::new(0),
                idle_threads: AtomicUsize::new(0),
                next_worker_id: AtomicUsize::new(0),
                queue: SegQueue::new(),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
                idle_timeout: options.idle_timeout,
                thread_name_prefix: options.thread_name_prefix,
            }),
        }
    }

    /// Queues a task, waking an idle worker or spawning a new one.
    pub(crate) fn submit(&self, task: Task) {
        self.inner.queue.push(task);
        if self.inner.idle_threads.load(Ordering::Acquire) == 0 {
            self.maybe_spawn();
        }
        let _guard = self.inner.mutex.lock().expect("pool lock poisoned");
        self.inner.condvar.notify_one();
    }

    fn maybe_spawn(&self) {
        loop {
            let active = self.inner.active_threads.load(Ordering::Acquire);
            if active >= self.inner.max_threads {
                return;
            }
            if self
                .inner
                .active_threads
                .compare_exchange(active, active + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let inner = Arc::clone(&self.inner);
        let id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{id}", inner.thread_name_prefix);
        debug!(worker = %name, "pool worker spawned");
        thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(&inner))
            .expect("failed to spawn pool worker");
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        while let Some(task) = inner.queue.pop() {
            run_task(task);
        }

        inner.idle_threads.fetch_add(1, Ordering::AcqRel);
        let guard = inner.mutex.lock().expect("pool lock poisoned");
        if !inner.queue.is_empty() {
            inner.idle_threads.fetch_sub(1, Ordering::AcqRel);
            drop(guard);
            continue;
        }
        let (guard, timeout) = inner
            .condvar
            .wait_timeout(guard, inner.idle_timeout)
            .expect("pool lock poisoned");
        drop(guard);
        inner.idle_threads.fetch_sub(1, Ordering::AcqRel);

        if timeout.timed_out() && inner.queue.is_empty() {
            break;
        }
    }
    inner.active_threads.fetch_sub(1, Ordering::AcqRel);
    debug!("pool worker retired");
}

pub(crate) fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        warn!("subscriber block panicked; panic contained to that delivery");
    }
}

static POOLS: OnceLock<[Pool; 5]> = OnceLock::new();

/// The shared pool for a lane.
pub(crate) fn shared(lane: Lane) -> &'static Pool {
    let pools = POOLS.get_or_init(|| Lane::ALL.map(|lane| Pool::new(PoolOptions::for_lane(lane))));
    &pools[lane.index()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = Pool::new(PoolOptions {
            max_threads: 2,
            idle_timeout: Duration::from_millis(50),
            thread_name_prefix: "pool-test".to_string(),
        });
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let count = Arc::clone(&count);
            pool.submit(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 64 {
            assert!(std::time::Instant::now() < deadline, "tasks did not finish");
            thread::yield_now();
        }
    }

    #[test]
    fn pool_never_exceeds_max_threads() {
        let pool = Pool::new(PoolOptions {
            max_threads: 2,
            idle_timeout: Duration::from_millis(50),
            thread_name_prefix: "pool-cap-test".to_string(),
        });
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let done = Arc::clone(&done);
            pool.submit(Box::new(move || {
                thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            }));
            assert!(pool.inner.active_threads.load(Ordering::SeqCst) <= 2);
        }
        while done.load(Ordering::SeqCst) < 16 {
            thread::yield_now();
        }
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = Pool::new(PoolOptions {
            max_threads: 1,
            idle_timeout: Duration::from_secs(1),
            thread_name_prefix: "pool-panic-test".to_string(),
        });
        pool.submit(Box::new(|| panic!("deliberate")));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        pool.submit(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ran.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "worker died");
            thread::yield_now();
        }
    }

    #[test]
    fn idle_worker_retires() {
        let pool = Pool::new(PoolOptions {
            max_threads: 1,
            idle_timeout: Duration::from_millis(10),
            thread_name_prefix: "pool-retire-test".to_string(),
        });
        pool.submit(Box::new(|| {}));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.inner.active_threads.load(Ordering::SeqCst) > 0 {
            assert!(std::time::Instant::now() < deadline, "worker never retired");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

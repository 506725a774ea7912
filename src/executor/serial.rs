//! Named serial queues.
//!
//! A serial queue runs its blocks one at a time, in submission order, on a
//! single worker thread. The worker is spawned on first use and retires
//! after sitting idle, so a queue that goes quiet costs nothing; the next
//! submission respawns it.

use super::pool::run_task;
use super::Task;
use crate::tracing_compat::debug;
use crossbeam_queue::SegQueue;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

struct WorkerState {
    running: bool,
}

pub(crate) struct SerialQueue {
    name: String,
    queue: SegQueue<Task>,
    state: Mutex<WorkerState>,
    condvar: Condvar,
}

impl SerialQueue {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            queue: SegQueue::new(),
            state: Mutex::new(WorkerState { running: false }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn submit(self: &Arc<Self>, task: Task) {
        self.queue.push(task);
        let mut state = self.state.lock().expect("serial queue lock poisoned");
        if state.running {
            self.condvar.notify_one();
        } else {
            state.running = true;
            drop(state);
            let me = Arc::clone(self);
            debug!(queue = %self.name, "serial queue worker spawned");
            thread::Builder::new()
                .name(format!("rivulet-serial-{}", self.name))
                .spawn(move || me.worker_loop())
                .expect("failed to spawn serial queue worker");
        }
    }

    fn worker_loop(&self) {
        loop {
            while let Some(task) = self.queue.pop() {
                run_task(task);
            }

            let state = self.state.lock().expect("serial queue lock poisoned");
            if !self.queue.is_empty() {
                continue;
            }
            let (mut state, timeout) = self
                .condvar
                .wait_timeout(state, IDLE_TIMEOUT)
                .expect("serial queue lock poisoned");
            if timeout.timed_out() && self.queue.is_empty() {
                // Retire under the lock so a racing submit either sees
                // running=false and respawns, or we see its task.
                state.running = false;
                debug!(queue = %self.name, "serial queue worker retired");
                return;
            }
        }
    }
}

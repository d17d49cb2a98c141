//! Worker Pool - 有界线程池
//!
//! Placement rules for a submitted job, checked in order:
//! 1. fewer than `core` workers alive: start a worker for it;
//! 2. the queue has room (idle workers count as extra room, a job handed to
//!    an idle worker is picked up at once): enqueue it;
//! 3. fewer than `max` workers alive: start a worker for it;
//! 4. otherwise reject.
//!
//! Queued jobs are taken in FIFO order. Workers above `core` retire after
//! `keep_alive` without work.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolLimits {
    pub core: usize,
    pub max: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    /// Every worker is busy and the queue is full.
    Saturated,
    /// The pool no longer accepts work.
    ShutDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PoolStats {
    pub threads: usize,
    pub active: usize,
    pub idle: usize,
    pub queued: usize,
}

struct PoolState {
    queue: VecDeque<Job>,
    limits: PoolLimits,
    threads: usize,
    active: usize,
    idle: usize,
    next_worker_id: u64,
    shutdown: bool,
}

struct Shared {
    name: Arc<str>,
    state: Mutex<PoolState>,
    work_available: Condvar,
    terminated: Condvar,
}

pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub(crate) fn new(name: Arc<str>, limits: PoolLimits) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(PoolState {
                    queue: VecDeque::with_capacity(limits.queue_capacity.min(1024)),
                    limits,
                    threads: 0,
                    active: 0,
                    idle: 0,
                    next_worker_id: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                terminated: Condvar::new(),
            }),
        }
    }

    /// Hands `job` to a worker or the queue without blocking.
    pub(crate) fn execute(&self, job: Job) -> Result<(), Rejection> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Rejection::ShutDown);
        }

        if state.threads < state.limits.core {
            return self.start_worker(&mut state, job);
        }

        if state.queue.len() < state.idle + state.limits.queue_capacity {
            state.queue.push_back(job);
            self.shared.work_available.notify_one();
            return Ok(());
        }

        if state.threads < state.limits.max {
            return self.start_worker(&mut state, job);
        }

        Err(Rejection::Saturated)
    }

    fn start_worker(&self, state: &mut PoolState, job: Job) -> Result<(), Rejection> {
        let id = state.next_worker_id;
        state.next_worker_id += 1;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("bulkhead-{}-{}", self.shared.name, id))
            .spawn(move || run_worker(&shared, job));

        match spawned {
            Ok(_) => {
                state.threads += 1;
                state.active += 1;
                debug!(bulkhead = %self.shared.name, worker = id, threads = state.threads, "Worker started");
                Ok(())
            }
            Err(e) => {
                warn!(bulkhead = %self.shared.name, error = %e, "Failed to start worker thread");
                Err(Rejection::Saturated)
            }
        }
    }

    /// Applies new limits. Running jobs are untouched; surplus idle workers
    /// are woken so they can retire.
    pub(crate) fn resize(&self, limits: PoolLimits) {
        let mut state = self.shared.state.lock();
        state.limits = limits;
        self.shared.work_available.notify_all();
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            threads: state.threads,
            active: state.active,
            idle: state.idle,
            queued: state.queue.len(),
        }
    }

    /// Stops accepting work. Already queued jobs still run, then the workers
    /// exit.
    pub(crate) fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        info!(
            bulkhead = %self.shared.name,
            threads = state.threads,
            queued = state.queue.len(),
            "Shutting down worker pool"
        );
        self.shared.work_available.notify_all();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Waits until every worker has exited. Returns `false` on timeout.
    pub(crate) fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();
        while state.threads > 0 {
            match deadline {
                Some(deadline) => {
                    if self.shared.terminated.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.shared.terminated.wait(&mut state),
            }
        }

        if state.threads == 0 {
            info!(bulkhead = %self.shared.name, "Worker pool shut down gracefully");
            true
        } else {
            warn!(
                bulkhead = %self.shared.name,
                threads = state.threads,
                "Worker pool shutdown timed out"
            );
            false
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers own their own handle to the shared state and exit once the
        // queue is drained.
        self.shutdown();
    }
}

fn run_worker(shared: &Shared, first: Job) {
    let mut job = first;
    loop {
        // Jobs report their own panics to the submitter; this only keeps the
        // worker alive.
        let _ = panic::catch_unwind(AssertUnwindSafe(job));

        match next_job(shared) {
            Some(next) => job = next,
            None => return,
        }
    }
}

fn next_job(shared: &Shared) -> Option<Job> {
    let mut state = shared.state.lock();
    state.active -= 1;

    loop {
        if let Some(job) = state.queue.pop_front() {
            state.active += 1;
            return Some(job);
        }

        if state.shutdown || state.threads > state.limits.max {
            retire(shared, &mut state);
            return None;
        }

        let may_retire = state.threads > state.limits.core;
        state.idle += 1;
        let timed_out = if may_retire {
            let keep_alive = state.limits.keep_alive;
            shared
                .work_available
                .wait_for(&mut state, keep_alive)
                .timed_out()
        } else {
            shared.work_available.wait(&mut state);
            false
        };
        state.idle -= 1;

        if timed_out && state.queue.is_empty() && state.threads > state.limits.core {
            retire(shared, &mut state);
            return None;
        }
    }
}

fn retire(shared: &Shared, state: &mut PoolState) {
    state.threads -= 1;
    debug!(bulkhead = %shared.name, threads = state.threads, "Worker retired");
    if state.threads == 0 {
        shared.terminated.notify_all();
    }
}

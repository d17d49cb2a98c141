//! Thread-Pool Bulkhead - 线程池隔离舱
//!
//! Work runs on the bulkhead's own worker threads while the submitting thread
//! waits for the outcome. Admission never waits: once every worker is busy and
//! the queue is full, the call is rejected on the spot.

use super::config::ThreadPoolBulkheadConfig;
use super::error::{BulkheadFullError, CallError, ConfigError};
use super::events::{BulkheadEvent, BulkheadEventKind, CallCounts, EventPublisher};
use super::pool::{Job, PoolLimits, Rejection, WorkerPool};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Snapshot of a thread-pool bulkhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPoolBulkheadMetrics {
    pub core_thread_pool_size: usize,
    /// Worker threads currently alive.
    pub thread_pool_size: usize,
    pub maximum_thread_pool_size: usize,
    /// Workers currently running a job.
    pub active_count: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub remaining_queue_capacity: usize,
    pub calls: CallCounts,
}

/// 线程池隔离舱
pub struct ThreadPoolBulkhead {
    name: Arc<str>,
    config: RwLock<Arc<ThreadPoolBulkheadConfig>>,
    pool: WorkerPool,
    events: Arc<EventPublisher>,
}

impl std::fmt::Debug for ThreadPoolBulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolBulkhead")
            .field("name", &self.name)
            .field("config", &self.config())
            .field("metrics", &self.metrics())
            .finish()
    }
}

fn pool_limits(config: &ThreadPoolBulkheadConfig) -> PoolLimits {
    PoolLimits {
        core: config.core_thread_pool_size,
        max: config.max_thread_pool_size,
        queue_capacity: config.queue_capacity,
        keep_alive: config.keep_alive_duration(),
    }
}

impl ThreadPoolBulkhead {
    pub fn new(
        name: impl Into<String>,
        config: ThreadPoolBulkheadConfig,
    ) -> Result<Self, ConfigError> {
        let name: String = name.into();
        config.validate(&name)?;
        Ok(Self::from_validated(name, config))
    }

    pub fn with_defaults(name: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(name, ThreadPoolBulkheadConfig::default())
    }

    pub(crate) fn from_validated(name: String, config: ThreadPoolBulkheadConfig) -> Self {
        info!(
            bulkhead = %name,
            core = config.core_thread_pool_size,
            max = config.max_thread_pool_size,
            queue_capacity = config.queue_capacity,
            keep_alive_ms = config.keep_alive_duration_ms,
            "Thread-pool bulkhead created"
        );

        let name: Arc<str> = Arc::from(name);
        Self {
            pool: WorkerPool::new(Arc::clone(&name), pool_limits(&config)),
            name,
            config: RwLock::new(Arc::new(config)),
            events: Arc::new(EventPublisher::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<ThreadPoolBulkheadConfig> {
        Arc::clone(&self.config.read())
    }

    /// 提交任务（非阻塞）。Accepted work is guaranteed to run; its outcome is
    /// collected through the returned [`Submission`].
    pub fn submit<R, F>(&self, work: F) -> Result<Submission<R>, BulkheadFullError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let events = Arc::clone(&self.events);
        let name = Arc::clone(&self.name);

        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work));
            events.publish(&name, BulkheadEventKind::CallFinished);
            // The submitter may have dropped its `Submission`.
            let _ = outcome_tx.send(outcome);
        });

        match self.pool.execute(job) {
            Ok(()) => {
                self.events.publish(&self.name, BulkheadEventKind::CallPermitted);
                Ok(Submission {
                    name: Arc::clone(&self.name),
                    outcome: outcome_rx,
                })
            }
            Err(reason) => {
                let reason = match reason {
                    Rejection::Saturated => "saturated",
                    Rejection::ShutDown => "closed",
                };
                debug!(bulkhead = %self.name, reason, "Work rejected");
                self.events.publish(&self.name, BulkheadEventKind::CallRejected);
                Err(BulkheadFullError {
                    name: self.name.to_string(),
                })
            }
        }
    }

    /// Runs `work` on a worker and blocks until it finishes. A panic inside
    /// `work` resumes on the calling thread.
    pub fn execute<T, E, F>(&self, work: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit(work)?.wait()?.map_err(CallError::Failed)
    }

    /// Swaps in `config` and resizes the pool for subsequent submissions.
    pub fn change_config(&self, config: ThreadPoolBulkheadConfig) -> Result<(), ConfigError> {
        config.validate(&self.name)?;

        let mut current = self.config.write();
        self.pool.resize(pool_limits(&config));
        info!(
            bulkhead = %self.name,
            core = config.core_thread_pool_size,
            max = config.max_thread_pool_size,
            queue_capacity = config.queue_capacity,
            "Thread-pool bulkhead config changed"
        );
        *current = Arc::new(config);
        Ok(())
    }

    pub fn metrics(&self) -> ThreadPoolBulkheadMetrics {
        let config = self.config();
        let stats = self.pool.stats();
        ThreadPoolBulkheadMetrics {
            core_thread_pool_size: config.core_thread_pool_size,
            thread_pool_size: stats.threads,
            maximum_thread_pool_size: config.max_thread_pool_size,
            active_count: stats.active,
            queue_depth: stats.queued,
            queue_capacity: config.queue_capacity,
            remaining_queue_capacity: config.queue_capacity.saturating_sub(stats.queued),
            calls: self.events.counts(),
        }
    }

    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&BulkheadEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener);
    }

    /// Stops accepting work. Queued work still runs; workers then exit.
    pub fn close(&self) {
        self.pool.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Waits for every worker to exit after [`close`](Self::close).
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.pool.await_termination(timeout)
    }
}

/// Handle to work accepted by a [`ThreadPoolBulkhead`].
#[must_use = "dropping a submission discards the work's result"]
pub struct Submission<R> {
    name: Arc<str>,
    outcome: oneshot::Receiver<thread::Result<R>>,
}

impl<R> Submission<R> {
    pub fn bulkhead_name(&self) -> &str {
        &self.name
    }

    /// Blocks until the work has run and returns its value. Panics raised by
    /// the work are resumed here. Work dropped without running (its pool
    /// went away first) reports the bulkhead as full.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<R, BulkheadFullError> {
        match self.outcome.blocking_recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(BulkheadFullError::new(&*self.name)),
        }
    }
}

impl<R> std::fmt::Debug for Submission<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("bulkhead", &self.name)
            .finish_non_exhaustive()
    }
}

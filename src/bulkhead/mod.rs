//! Bulkhead 隔离舱
//!
//! Admission control that caps how many calls may run against a protected
//! resource at once. Two strategies share one call-site contract:
//!
//! - **Semaphore** - callers run the work on their own thread after taking a
//!   permit, waiting up to `max_wait_duration` for one to free up.
//! - **Thread pool** - work is handed to a bounded worker pool with a bounded
//!   FIFO queue; admission is rejected immediately once both are full.
//!
//! Instances are usually obtained through a [`Registry`], which caches them by
//! name and resolves named configs.
//!
//! ```no_run
//! use bulkhead::{CallError, execute_named};
//!
//! let rows: Result<u32, CallError<std::io::Error>> = execute_named("db", || Ok(42));
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod execute;
mod pool;
pub mod registry;
pub mod semaphore;
pub mod thread_pool;

pub use config::{
    BulkheadConfig, BulkheadConfigBuilder, INLINE_CONFIG_NAME, StrategyConfig, StrategyKind,
    ThreadPoolBulkheadConfig, ThreadPoolBulkheadConfigBuilder,
};
pub use error::{BulkheadFullError, CallError, ConfigError};
pub use events::{BulkheadEvent, BulkheadEventKind, CallCounts};
pub use execute::{execute, execute_named};
pub use registry::{
    ConfigSource, DEFAULT_CONFIG_NAME, Registry, global_registry, set_global_registry,
};
pub use semaphore::{BulkheadMetrics, Permit, SemaphoreBulkhead};
pub use thread_pool::{Submission, ThreadPoolBulkhead, ThreadPoolBulkheadMetrics};

use std::sync::Arc;

pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 25;
pub const DEFAULT_MAX_WAIT_DURATION_MS: u64 = 0;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_KEEP_ALIVE_DURATION_MS: u64 = 20;

/// Type-erased work handed to an [`Isolation`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Admission capability shared by every strategy.
///
/// `run_isolated` returns only after `task` has run to completion, with all
/// admission resources already released. `Err` means the task was dropped
/// without running.
pub trait Isolation: Send + Sync {
    fn name(&self) -> &str;

    fn run_isolated(&self, task: Task) -> Result<(), BulkheadFullError>;
}

impl Isolation for SemaphoreBulkhead {
    fn name(&self) -> &str {
        SemaphoreBulkhead::name(self)
    }

    fn run_isolated(&self, task: Task) -> Result<(), BulkheadFullError> {
        let permit = self.try_acquire_permission()?;
        task();
        permit.release();
        Ok(())
    }
}

impl Isolation for ThreadPoolBulkhead {
    fn name(&self) -> &str {
        ThreadPoolBulkhead::name(self)
    }

    fn run_isolated(&self, task: Task) -> Result<(), BulkheadFullError> {
        self.submit(task)?.wait()
    }
}

/// Shared handle to a bulkhead of either strategy.
#[derive(Debug, Clone)]
pub enum Bulkhead {
    Semaphore(Arc<SemaphoreBulkhead>),
    ThreadPool(Arc<ThreadPoolBulkhead>),
}

/// Strategy-tagged metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metrics {
    Semaphore(BulkheadMetrics),
    ThreadPool(ThreadPoolBulkheadMetrics),
}

impl Metrics {
    pub fn calls(&self) -> CallCounts {
        match self {
            Metrics::Semaphore(m) => m.calls,
            Metrics::ThreadPool(m) => m.calls,
        }
    }
}

impl Bulkhead {
    /// Builds a new instance of the strategy matching `config`.
    pub fn new(name: impl Into<String>, config: StrategyConfig) -> Result<Self, ConfigError> {
        Ok(match config {
            StrategyConfig::Semaphore(config) => {
                Bulkhead::Semaphore(Arc::new(SemaphoreBulkhead::new(name, config)?))
            }
            StrategyConfig::ThreadPool(config) => {
                Bulkhead::ThreadPool(Arc::new(ThreadPoolBulkhead::new(name, config)?))
            }
        })
    }

    /// Skips validation; `config` must already have passed it.
    pub(crate) fn from_validated(name: &str, config: StrategyConfig) -> Self {
        match config {
            StrategyConfig::Semaphore(config) => Bulkhead::Semaphore(Arc::new(
                SemaphoreBulkhead::from_validated(name.to_string(), config),
            )),
            StrategyConfig::ThreadPool(config) => Bulkhead::ThreadPool(Arc::new(
                ThreadPoolBulkhead::from_validated(name.to_string(), config),
            )),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Bulkhead::Semaphore(b) => b.name(),
            Bulkhead::ThreadPool(b) => b.name(),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Bulkhead::Semaphore(_) => StrategyKind::Semaphore,
            Bulkhead::ThreadPool(_) => StrategyKind::ThreadPool,
        }
    }

    pub fn config(&self) -> StrategyConfig {
        match self {
            Bulkhead::Semaphore(b) => StrategyConfig::Semaphore((*b.config()).clone()),
            Bulkhead::ThreadPool(b) => StrategyConfig::ThreadPool((*b.config()).clone()),
        }
    }

    /// Swaps in a new config. The config must be for this handle's strategy.
    pub fn change_config(&self, config: impl Into<StrategyConfig>) -> Result<(), ConfigError> {
        match (self, config.into()) {
            (Bulkhead::Semaphore(b), StrategyConfig::Semaphore(config)) => b.change_config(config),
            (Bulkhead::ThreadPool(b), StrategyConfig::ThreadPool(config)) => {
                b.change_config(config)
            }
            (_, config) => config.validate_for(self.kind(), self.name()),
        }
    }

    pub fn metrics(&self) -> Metrics {
        match self {
            Bulkhead::Semaphore(b) => Metrics::Semaphore(b.metrics()),
            Bulkhead::ThreadPool(b) => Metrics::ThreadPool(b.metrics()),
        }
    }

    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&BulkheadEvent) + Send + Sync + 'static,
    {
        match self {
            Bulkhead::Semaphore(b) => b.on_event(listener),
            Bulkhead::ThreadPool(b) => b.on_event(listener),
        }
    }

    /// True when both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Bulkhead) -> bool {
        match (self, other) {
            (Bulkhead::Semaphore(a), Bulkhead::Semaphore(b)) => Arc::ptr_eq(a, b),
            (Bulkhead::ThreadPool(a), Bulkhead::ThreadPool(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_semaphore(&self) -> Option<&Arc<SemaphoreBulkhead>> {
        match self {
            Bulkhead::Semaphore(b) => Some(b),
            Bulkhead::ThreadPool(_) => None,
        }
    }

    pub fn as_thread_pool(&self) -> Option<&Arc<ThreadPoolBulkhead>> {
        match self {
            Bulkhead::ThreadPool(b) => Some(b),
            Bulkhead::Semaphore(_) => None,
        }
    }

    /// See [`execute`](execute::execute).
    pub fn execute<T, E, F>(&self, work: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        execute::execute(self, work)
    }
}

impl Isolation for Bulkhead {
    fn name(&self) -> &str {
        Bulkhead::name(self)
    }

    fn run_isolated(&self, task: Task) -> Result<(), BulkheadFullError> {
        match self {
            Bulkhead::Semaphore(b) => b.run_isolated(task),
            Bulkhead::ThreadPool(b) => b.run_isolated(task),
        }
    }
}

impl From<SemaphoreBulkhead> for Bulkhead {
    fn from(bulkhead: SemaphoreBulkhead) -> Self {
        Bulkhead::Semaphore(Arc::new(bulkhead))
    }
}

impl From<ThreadPoolBulkhead> for Bulkhead {
    fn from(bulkhead: ThreadPoolBulkhead) -> Self {
        Bulkhead::ThreadPool(Arc::new(bulkhead))
    }
}

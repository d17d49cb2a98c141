//! Bulkhead configuration values.
//!
//! Both config types are immutable once built. Changing a limit means building
//! a new value (optionally starting from an existing one through
//! `Builder::from(&config)`) and handing it to `change_config`.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name used for configs built inline rather than registered under a name.
pub const INLINE_CONFIG_NAME: &str = "<inline>";

// ── Semaphore strategy ────────────────────────────────────────────

/// Limits for a semaphore bulkhead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkheadConfig {
    /// Total permits. Zero is legal and denies every call.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// How long a blocked caller waits for a permit before giving up.
    #[serde(default = "default_max_wait_duration_ms")]
    pub max_wait_duration_ms: u64,
}

fn default_max_concurrent_calls() -> usize {
    super::DEFAULT_MAX_CONCURRENT_CALLS
}

fn default_max_wait_duration_ms() -> u64 {
    super::DEFAULT_MAX_WAIT_DURATION_MS
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            max_wait_duration_ms: default_max_wait_duration_ms(),
        }
    }
}

impl BulkheadConfig {
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::default()
    }

    pub fn max_wait_duration(&self) -> Duration {
        Duration::from_millis(self.max_wait_duration_ms)
    }

    /// Checks the value as a whole. `name` is only used in the error.
    ///
    /// Every field is unsigned, so the only failure is an out-of-range wait
    /// that cannot be represented as a deadline.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if std::time::Instant::now()
            .checked_add(self.max_wait_duration())
            .is_none()
        {
            return Err(ConfigError::invalid(
                name,
                "max_wait_duration_ms",
                format!("{}ms overflows the clock", self.max_wait_duration_ms),
            ));
        }
        Ok(())
    }
}

/// Builder over a fully-defaulted [`BulkheadConfig`].
#[derive(Debug, Clone, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl From<&BulkheadConfig> for BulkheadConfigBuilder {
    fn from(config: &BulkheadConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl BulkheadConfigBuilder {
    pub fn max_concurrent_calls(mut self, calls: usize) -> Self {
        self.config.max_concurrent_calls = calls;
        self
    }

    pub fn max_wait_duration(mut self, wait: Duration) -> Self {
        self.config.max_wait_duration_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn build(self) -> Result<BulkheadConfig, ConfigError> {
        self.config.validate(INLINE_CONFIG_NAME)?;
        Ok(self.config)
    }
}

// ── Thread-pool strategy ──────────────────────────────────────────

/// Limits for a thread-pool bulkhead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadPoolBulkheadConfig {
    /// Upper bound on live worker threads.
    #[serde(default = "default_max_thread_pool_size")]
    pub max_thread_pool_size: usize,
    /// Workers kept alive while idle.
    #[serde(default = "default_core_thread_pool_size")]
    pub core_thread_pool_size: usize,
    /// Depth of the FIFO queue used once the core workers are busy.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Idle lifetime of workers above the core count.
    #[serde(default = "default_keep_alive_duration_ms")]
    pub keep_alive_duration_ms: u64,
}

fn default_max_thread_pool_size() -> usize {
    num_cpus::get().max(1)
}

fn default_core_thread_pool_size() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

fn default_queue_capacity() -> usize {
    super::DEFAULT_QUEUE_CAPACITY
}

fn default_keep_alive_duration_ms() -> u64 {
    super::DEFAULT_KEEP_ALIVE_DURATION_MS
}

impl Default for ThreadPoolBulkheadConfig {
    fn default() -> Self {
        Self {
            max_thread_pool_size: default_max_thread_pool_size(),
            core_thread_pool_size: default_core_thread_pool_size(),
            queue_capacity: default_queue_capacity(),
            keep_alive_duration_ms: default_keep_alive_duration_ms(),
        }
    }
}

impl ThreadPoolBulkheadConfig {
    pub fn builder() -> ThreadPoolBulkheadConfigBuilder {
        ThreadPoolBulkheadConfigBuilder::default()
    }

    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_millis(self.keep_alive_duration_ms)
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.max_thread_pool_size == 0 {
            return Err(ConfigError::invalid(
                name,
                "max_thread_pool_size",
                "must be at least 1",
            ));
        }
        if self.core_thread_pool_size == 0 {
            return Err(ConfigError::invalid(
                name,
                "core_thread_pool_size",
                "must be at least 1",
            ));
        }
        if self.core_thread_pool_size > self.max_thread_pool_size {
            return Err(ConfigError::invalid(
                name,
                "core_thread_pool_size",
                format!(
                    "{} exceeds max_thread_pool_size {}",
                    self.core_thread_pool_size, self.max_thread_pool_size
                ),
            ));
        }
        Ok(())
    }
}

/// Builder over a fully-defaulted [`ThreadPoolBulkheadConfig`].
///
/// Fields are only checked together in [`build`](Self::build), so setting
/// `core` above the current `max` before raising `max` is fine.
#[derive(Debug, Clone, Default)]
pub struct ThreadPoolBulkheadConfigBuilder {
    config: ThreadPoolBulkheadConfig,
}

impl From<&ThreadPoolBulkheadConfig> for ThreadPoolBulkheadConfigBuilder {
    fn from(config: &ThreadPoolBulkheadConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl ThreadPoolBulkheadConfigBuilder {
    pub fn max_thread_pool_size(mut self, size: usize) -> Self {
        self.config.max_thread_pool_size = size;
        self
    }

    pub fn core_thread_pool_size(mut self, size: usize) -> Self {
        self.config.core_thread_pool_size = size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn keep_alive_duration(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive_duration_ms =
            u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn build(self) -> Result<ThreadPoolBulkheadConfig, ConfigError> {
        self.config.validate(INLINE_CONFIG_NAME)?;
        Ok(self.config)
    }
}

// ── Strategy selection ────────────────────────────────────────────

/// Admission strategy of a registry. Fixed when the registry is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Semaphore,
    ThreadPool,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Semaphore => write!(f, "semaphore"),
            StrategyKind::ThreadPool => write!(f, "thread_pool"),
        }
    }
}

/// A config for either strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyConfig {
    Semaphore(BulkheadConfig),
    ThreadPool(ThreadPoolBulkheadConfig),
}

impl StrategyConfig {
    pub fn defaults_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Semaphore => Self::Semaphore(BulkheadConfig::default()),
            StrategyKind::ThreadPool => Self::ThreadPool(ThreadPoolBulkheadConfig::default()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Semaphore(_) => StrategyKind::Semaphore,
            Self::ThreadPool(_) => StrategyKind::ThreadPool,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self {
            Self::Semaphore(config) => config.validate(name),
            Self::ThreadPool(config) => config.validate(name),
        }
    }

    /// Validates the config and checks it belongs to `expected`.
    pub(crate) fn validate_for(&self, expected: StrategyKind, name: &str) -> Result<(), ConfigError> {
        if self.kind() != expected {
            return Err(ConfigError::invalid(
                name,
                "strategy",
                format!("is {} but the registry uses {}", self.kind(), expected),
            ));
        }
        self.validate(name)
    }
}

impl From<BulkheadConfig> for StrategyConfig {
    fn from(config: BulkheadConfig) -> Self {
        Self::Semaphore(config)
    }
}

impl From<ThreadPoolBulkheadConfig> for StrategyConfig {
    fn from(config: ThreadPoolBulkheadConfig) -> Self {
        Self::ThreadPool(config)
    }
}

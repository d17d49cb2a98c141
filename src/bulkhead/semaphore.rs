//! Semaphore Bulkhead - 基于许可计数的隔离舱
//!
//! Callers block in their own thread while waiting for a permit. The wait
//! deadline is taken from the config in effect when the attempt starts.

use super::config::BulkheadConfig;
use super::error::{BulkheadFullError, CallError, ConfigError};
use super::events::{BulkheadEvent, BulkheadEventKind, CallCounts, EventPublisher};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Permit bookkeeping. `in_use` may exceed `limit` for a while after the
/// limit is lowered; those callers finish normally and no new permit is
/// handed out until `in_use` drops below the new limit.
#[derive(Debug)]
struct PermitState {
    in_use: usize,
    limit: usize,
}

impl PermitState {
    fn available(&self) -> usize {
        self.limit.saturating_sub(self.in_use)
    }

    fn try_take(&mut self) -> bool {
        if self.in_use < self.limit {
            self.in_use += 1;
            true
        } else {
            false
        }
    }
}

/// Snapshot of a semaphore bulkhead's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadMetrics {
    pub available_concurrent_calls: usize,
    pub max_allowed_concurrent_calls: usize,
    pub calls: CallCounts,
}

/// 信号量隔离舱
#[derive(Debug)]
pub struct SemaphoreBulkhead {
    name: Arc<str>,
    config: RwLock<Arc<BulkheadConfig>>,
    state: Mutex<PermitState>,
    released: Condvar,
    events: EventPublisher,
}

impl SemaphoreBulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Result<Self, ConfigError> {
        let name: String = name.into();
        config.validate(&name)?;
        Ok(Self::from_validated(name, config))
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::from_validated(name.into(), BulkheadConfig::default())
    }

    pub(crate) fn from_validated(name: String, config: BulkheadConfig) -> Self {
        info!(
            bulkhead = %name,
            max_concurrent_calls = config.max_concurrent_calls,
            max_wait_ms = config.max_wait_duration_ms,
            "Semaphore bulkhead created"
        );

        Self {
            state: Mutex::new(PermitState {
                in_use: 0,
                limit: config.max_concurrent_calls,
            }),
            name: Arc::from(name),
            config: RwLock::new(Arc::new(config)),
            released: Condvar::new(),
            events: EventPublisher::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Config currently in effect.
    pub fn config(&self) -> Arc<BulkheadConfig> {
        Arc::clone(&self.config.read())
    }

    /// 获取执行许可，按当前配置的 `max_wait_duration` 等待
    pub fn try_acquire_permission(&self) -> Result<Permit<'_>, BulkheadFullError> {
        let started = Instant::now();
        let wait = self.config.read().max_wait_duration();
        self.acquire_until(started.checked_add(wait), wait.is_zero())
    }

    /// 尝试立即获取许可（不等待）
    pub fn try_acquire_now(&self) -> Result<Permit<'_>, BulkheadFullError> {
        self.acquire_until(None, true)
    }

    /// `deadline == None` with `immediate == false` waits without bound; that
    /// only happens for waits too long to represent as an `Instant`.
    fn acquire_until(
        &self,
        deadline: Option<Instant>,
        immediate: bool,
    ) -> Result<Permit<'_>, BulkheadFullError> {
        let granted = {
            let mut state = self.state.lock();
            if state.try_take() {
                true
            } else if immediate {
                false
            } else {
                loop {
                    let timed_out = match deadline {
                        Some(deadline) => self.released.wait_until(&mut state, deadline).timed_out(),
                        None => {
                            self.released.wait(&mut state);
                            false
                        }
                    };
                    if state.try_take() {
                        break true;
                    }
                    if timed_out {
                        break false;
                    }
                }
            }
        };

        if granted {
            let permit = Permit { bulkhead: self };
            trace!(bulkhead = %self.name, "Permit granted");
            self.events.publish(&self.name, BulkheadEventKind::CallPermitted);
            Ok(permit)
        } else {
            debug!(bulkhead = %self.name, "Permit denied, bulkhead full");
            self.events.publish(&self.name, BulkheadEventKind::CallRejected);
            Err(BulkheadFullError {
                name: self.name.to_string(),
            })
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
            if state.in_use < state.limit {
                self.released.notify_one();
            }
        }
        trace!(bulkhead = %self.name, "Permit released");
        self.events.publish(&self.name, BulkheadEventKind::CallFinished);
    }

    /// Runs `work` while holding a permit. The permit is released on every
    /// exit path, including a panic inside `work`.
    pub fn execute<T, E, F>(&self, work: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire_permission()?;
        let result = work();
        permit.release();
        result.map_err(CallError::Failed)
    }

    /// Swaps in `config`. Callers already waiting keep the deadline they
    /// computed; a raised limit wakes them so they can take the new permits.
    pub fn change_config(&self, config: BulkheadConfig) -> Result<(), ConfigError> {
        config.validate(&self.name)?;

        let mut current = self.config.write();
        {
            let mut state = self.state.lock();
            let grown = config.max_concurrent_calls > state.limit;
            state.limit = config.max_concurrent_calls;
            if grown {
                self.released.notify_all();
            }
        }

        info!(
            bulkhead = %self.name,
            max_concurrent_calls = config.max_concurrent_calls,
            max_wait_ms = config.max_wait_duration_ms,
            "Semaphore bulkhead config changed"
        );
        *current = Arc::new(config);
        Ok(())
    }

    pub fn metrics(&self) -> BulkheadMetrics {
        let state = self.state.lock();
        BulkheadMetrics {
            available_concurrent_calls: state.available(),
            max_allowed_concurrent_calls: state.limit,
            calls: self.events.counts(),
        }
    }

    /// 注册事件监听器
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&BulkheadEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener);
    }
}

/// 执行许可 - 持有期间占用一个并发名额，drop 时归还
#[must_use = "the permit is released as soon as it is dropped"]
#[derive(Debug)]
pub struct Permit<'a> {
    bulkhead: &'a SemaphoreBulkhead,
}

impl Permit<'_> {
    pub fn bulkhead_name(&self) -> &str {
        self.bulkhead.name()
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.bulkhead.release();
    }
}

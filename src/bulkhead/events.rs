//! Per-bulkhead event stream.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkheadEventKind {
    /// Admission granted (permit taken or work accepted by the pool).
    CallPermitted,
    /// Admission denied with `BulkheadFullError`.
    CallRejected,
    /// Admitted work finished, successfully or not.
    CallFinished,
}

impl std::fmt::Display for BulkheadEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkheadEventKind::CallPermitted => write!(f, "CallPermitted"),
            BulkheadEventKind::CallRejected => write!(f, "CallRejected"),
            BulkheadEventKind::CallFinished => write!(f, "CallFinished"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BulkheadEvent {
    pub bulkhead: Arc<str>,
    pub kind: BulkheadEventKind,
    pub at: Instant,
}

/// Running totals of call outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub permitted: u64,
    pub rejected: u64,
    pub finished: u64,
}

type Listener = Arc<dyn Fn(&BulkheadEvent) + Send + Sync>;

/// Listener list and outcome counters owned by a bulkhead.
///
/// Publishing snapshots the list first, so listeners run without any lock
/// held and may register further listeners. A panicking listener is logged
/// and skipped; the remaining listeners still run.
#[derive(Default)]
pub(crate) struct EventPublisher {
    listeners: RwLock<Vec<Listener>>,
    permitted: AtomicU64,
    rejected: AtomicU64,
    finished: AtomicU64,
}

impl EventPublisher {
    pub(crate) fn counts(&self) -> CallCounts {
        CallCounts {
            permitted: self.permitted.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&BulkheadEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub(crate) fn publish(&self, bulkhead: &Arc<str>, kind: BulkheadEventKind) {
        let counter = match kind {
            BulkheadEventKind::CallPermitted => &self.permitted,
            BulkheadEventKind::CallRejected => &self.rejected,
            BulkheadEventKind::CallFinished => &self.finished,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        let listeners: Vec<Listener> = {
            let guard = self.listeners.read();
            if guard.is_empty() {
                return;
            }
            guard.clone()
        };
        let event = BulkheadEvent {
            bulkhead: Arc::clone(bulkhead),
            kind,
            at: Instant::now(),
        };
        for listener in &listeners {
            // A failing listener must not unwind through admission code.
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(bulkhead = %event.bulkhead, kind = %event.kind, "Event listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("listeners", &self.listeners.read().len())
            .field("counts", &self.counts())
            .finish()
    }
}

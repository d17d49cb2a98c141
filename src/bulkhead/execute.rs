//! Strategy-agnostic call path.

use super::error::{BulkheadFullError, CallError};
use super::registry::global_registry;
use super::{Isolation, Task};
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::oneshot;

/// Runs `work` inside `bulkhead` and hands back whatever it produced.
///
/// Denial surfaces as [`CallError::Full`]; the work's own error comes back
/// unchanged in [`CallError::Failed`]. A panic inside `work` is resumed on
/// the calling thread once admission resources are released.
pub fn execute<B, T, E, F>(bulkhead: &B, work: F) -> Result<T, CallError<E>>
where
    B: Isolation + ?Sized,
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (outcome_tx, mut outcome_rx) = oneshot::channel();
    let task: Task = Box::new(move || {
        let _ = outcome_tx.send(panic::catch_unwind(AssertUnwindSafe(work)));
    });

    bulkhead.run_isolated(task)?;

    match outcome_rx.try_recv() {
        Ok(Ok(result)) => result.map_err(CallError::Failed),
        Ok(Err(payload)) => panic::resume_unwind(payload),
        // The strategy reported success without running the task.
        Err(_) => Err(BulkheadFullError::new(bulkhead.name()).into()),
    }
}

/// Resolves `name` through the global registry, creating a default-configured
/// bulkhead if needed, and runs `work` inside it.
pub fn execute_named<T, E, F>(name: &str, work: F) -> Result<T, CallError<E>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let bulkhead = global_registry().bulkhead(name);
    execute(&bulkhead, work)
}

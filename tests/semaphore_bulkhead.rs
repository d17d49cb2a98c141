//! Integration tests for the semaphore strategy.
//!
//! Callers run the work on their own threads; these tests drive several
//! threads against one bulkhead and check the permit count never overshoots.

use bulkhead::{BulkheadConfig, CallError, SemaphoreBulkhead, execute};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

fn bulkhead(name: &str, calls: usize, wait_ms: u64) -> Arc<SemaphoreBulkhead> {
    let config = BulkheadConfig::builder()
        .max_concurrent_calls(calls)
        .max_wait_duration(Duration::from_millis(wait_ms))
        .build()
        .unwrap();
    Arc::new(SemaphoreBulkhead::new(name, config).unwrap())
}

/// Holds the only permit on a helper thread until `release` is sent.
fn hold_permit(bh: &Arc<SemaphoreBulkhead>) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let bh = Arc::clone(bh);
    let handle = thread::spawn(move || {
        bh.execute(|| {
            held_tx.send(()).unwrap();
            release_rx.recv().ok();
            Ok::<_, ()>(())
        })
        .unwrap();
    });
    held_rx.recv().unwrap();
    (release_tx, handle)
}

// ─────────────────────────────────────────────────────────────────────────────
// Permit accounting
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn concurrent_calls_never_exceed_limit() {
    let bh = bulkhead("limited", 3, 5_000);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(12));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let bh = Arc::clone(&bh);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                execute(&*bh, move || {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                })
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(bh.metrics().available_concurrent_calls, 3);
    assert_eq!(bh.metrics().calls.finished, 12);
}

#[test]
fn failing_work_frees_its_permit_for_the_next_call() {
    let bh = bulkhead("flaky", 1, 0);

    let err = execute(&*bh, || Err::<(), _>("connection reset")).unwrap_err();
    assert!(!err.is_full());
    assert_eq!(err.into_failure(), Some("connection reset"));

    assert_eq!(execute(&*bh, || Ok::<_, ()>("recovered")).unwrap(), "recovered");
}

// ─────────────────────────────────────────────────────────────────────────────
// Waiting for a permit
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn zero_wait_denies_second_call_immediately() {
    let bh = bulkhead("strict", 1, 0);
    let (release, holder) = hold_permit(&bh);

    let started = Instant::now();
    let err = execute(&*bh, || Ok::<_, String>(())).unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(err.rejected_by(), Some("strict"));
    assert_eq!(
        err.to_string(),
        "Bulkhead 'strict' is full and does not permit further calls"
    );

    release.send(()).unwrap();
    holder.join().unwrap();
}

#[test]
fn waiter_granted_when_first_call_finishes_within_wait() {
    let bh = bulkhead("patient", 1, 200);
    let (release, holder) = hold_permit(&bh);

    let waiter = {
        let bh = Arc::clone(&bh);
        thread::spawn(move || execute(&*bh, || Ok::<_, ()>("second")))
    };
    thread::sleep(Duration::from_millis(50));
    release.send(()).unwrap();

    assert_eq!(waiter.join().unwrap().unwrap(), "second");
    holder.join().unwrap();
}

#[test]
fn waiter_denied_when_first_call_outlasts_wait() {
    let bh = bulkhead("patient", 1, 200);
    let (release, holder) = hold_permit(&bh);

    let started = Instant::now();
    let result: Result<(), CallError<()>> = execute(&*bh, || Ok(()));
    let waited = started.elapsed();

    assert!(result.unwrap_err().is_full());
    assert!(waited >= Duration::from_millis(190));
    assert!(waited < Duration::from_millis(1_500));

    release.send(()).unwrap();
    holder.join().unwrap();
}

#[test]
fn zero_permits_reject_everything() {
    let bh = bulkhead("closed", 0, 50);
    let err = execute(&*bh, || Ok::<_, ()>(())).unwrap_err();
    assert!(err.is_full());
    assert_eq!(bh.metrics().calls.rejected, 1);
}

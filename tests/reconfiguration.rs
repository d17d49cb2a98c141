//! Runtime config changes: waiting callers keep the deadline they started
//! with, later callers see the new config, pools resize in place.

use bulkhead::{
    Bulkhead, BulkheadConfig, Registry, SemaphoreBulkhead, ThreadPoolBulkheadConfig, execute,
};
use std::collections::HashMap;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

fn semaphore_config(calls: usize, wait_ms: u64) -> BulkheadConfig {
    BulkheadConfig::builder()
        .max_concurrent_calls(calls)
        .max_wait_duration(Duration::from_millis(wait_ms))
        .build()
        .unwrap()
}

fn spawn_waiter(bh: &Arc<SemaphoreBulkhead>) -> thread::JoinHandle<(bool, Duration)> {
    let bh = Arc::clone(bh);
    thread::spawn(move || {
        let started = Instant::now();
        let granted = bh.try_acquire_permission().map(|p| p.release()).is_ok();
        (granted, started.elapsed())
    })
}

#[test]
fn longer_wait_does_not_extend_existing_waiter() {
    let bh = Arc::new(SemaphoreBulkhead::new("db", semaphore_config(1, 300)).unwrap());
    let held = bh.try_acquire_now().unwrap();

    let waiter = spawn_waiter(&bh);
    thread::sleep(Duration::from_millis(50));
    bh.change_config(semaphore_config(1, 10_000)).unwrap();

    let (granted, waited) = waiter.join().unwrap();
    assert!(!granted);
    assert!(waited < Duration::from_millis(3_000));
    drop(held);
}

#[test]
fn shorter_wait_does_not_cut_existing_waiter() {
    let bh = Arc::new(SemaphoreBulkhead::new("db", semaphore_config(1, 2_000)).unwrap());
    let held = bh.try_acquire_now().unwrap();

    let waiter = spawn_waiter(&bh);
    thread::sleep(Duration::from_millis(50));
    bh.change_config(semaphore_config(1, 0)).unwrap();

    // New callers observe the zero wait straight away.
    let started = Instant::now();
    assert!(bh.try_acquire_permission().is_err());
    assert!(started.elapsed() < Duration::from_millis(100));

    thread::sleep(Duration::from_millis(250));
    drop(held);

    let (granted, waited) = waiter.join().unwrap();
    assert!(granted);
    assert!(waited >= Duration::from_millis(250));
}

#[test]
fn pool_resize_applies_to_next_submission() {
    let registry = Registry::thread_pool(HashMap::from([(
        "default".to_string(),
        ThreadPoolBulkheadConfig::builder()
            .core_thread_pool_size(1)
            .max_thread_pool_size(1)
            .queue_capacity(0)
            .build()
            .unwrap(),
    )]))
    .unwrap();
    let bulkhead = registry.bulkhead("io");
    let pool = Arc::clone(bulkhead.as_thread_pool().unwrap());

    let (open, blocked) = mpsc::channel::<()>();
    let running = pool.submit(move || blocked.recv().ok()).unwrap();
    assert!(execute(&bulkhead, || Ok::<_, ()>(())).unwrap_err().is_full());

    bulkhead
        .change_config(
            ThreadPoolBulkheadConfig::builder()
                .core_thread_pool_size(1)
                .max_thread_pool_size(2)
                .queue_capacity(0)
                .build()
                .unwrap(),
        )
        .unwrap();
    assert_eq!(execute(&bulkhead, || Ok::<_, ()>("resized")).unwrap(), "resized");

    open.send(()).unwrap();
    running.wait().unwrap();
}

#[test]
fn invalid_change_keeps_current_config() {
    let bulkhead = Bulkhead::from(SemaphoreBulkhead::new("db", semaphore_config(4, 0)).unwrap());
    let err = bulkhead
        .change_config(ThreadPoolBulkheadConfig::default())
        .unwrap_err();
    assert!(err.to_string().contains("strategy"));
    assert_eq!(
        bulkhead.as_semaphore().unwrap().config().max_concurrent_calls,
        4
    );
}

//! Worker-pool lifecycle tests: growth bounds, ordering, completion
//! delivery, and shrink behavior after quiescence.

use herdstore_wqueue::{
    completion, work, StaticMembership, NoopTracer, ThreadControl, WorkQueueEngine,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn engine_with_nodes(nr_nodes: usize) -> WorkQueueEngine {
    WorkQueueEngine::new(
        Arc::new(StaticMembership::new(nr_nodes)),
        Arc::new(NoopTracer),
    )
    .expect("eventfd creation")
}

/// Pump completions until `counter` reaches `expected` or the deadline
/// passes.
fn drain_until(engine: &WorkQueueEngine, counter: &AtomicUsize, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while counter.load(Ordering::SeqCst) < expected {
        engine.dispatch_completions();
        assert!(
            Instant::now() < deadline,
            "only {} of {} completions arrived",
            counter.load(Ordering::SeqCst),
            expected
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_burst_completes_within_roof_and_shrinks() {
    let engine = engine_with_nodes(4);
    let q = engine
        .new_queue("burst", ThreadControl::Dynamic)
        .expect("queue creation");

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        let done = Arc::clone(&done);
        q.queue(work(
            || {},
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        ));
    }

    // roof for 4 nodes is 8 threads
    assert!(q.nr_threads() <= 8, "pool grew past the roof: {}", q.nr_threads());

    drain_until(&engine, &done, 1000);
    assert_eq!(done.load(Ordering::SeqCst), 1000);

    // surplus workers exit once the protection period runs out
    let deadline = Instant::now() + Duration::from_secs(5);
    while q.nr_threads() > 1 {
        assert!(
            Instant::now() < deadline,
            "pool did not shrink: {} threads",
            q.nr_threads()
        );
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_no_shrink_during_protection() {
    let engine = engine_with_nodes(4);
    let q = engine
        .new_queue("protected", ThreadControl::Dynamic)
        .expect("queue creation");

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..200 {
        let done = Arc::clone(&done);
        q.queue(work(
            // keep the single worker behind so the pool must grow
            || thread::sleep(Duration::from_millis(2)),
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        ));
    }
    drain_until(&engine, &done, 200);

    // well inside the one-second window after the last grow
    thread::sleep(Duration::from_millis(300));
    assert!(
        q.nr_threads() >= 2,
        "pool shrank during the protection period"
    );
}

#[test]
fn test_ordered_queue_runs_in_submission_order() {
    let engine = engine_with_nodes(4);
    let q = engine.ordered_queue("serial").expect("queue creation");

    let order = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..200 {
        let order = Arc::clone(&order);
        let done = Arc::clone(&done);
        q.queue(work(
            move || order.lock().push(i),
            move || {
                done.fetch_add(1, Ordering::SeqCst);
            },
        ));
    }
    drain_until(&engine, &done, 200);

    let order = order.lock();
    assert_eq!(*order, (0..200).collect::<Vec<_>>());
    // an ordered queue never grows past its single worker
    assert_eq!(q.nr_threads(), 1);
}

#[test]
fn test_done_runs_on_dispatching_thread() {
    let engine = engine_with_nodes(1);
    let q = engine.ordered_queue("dispatch").expect("queue creation");

    let done_thread = Arc::new(Mutex::new(None));
    let done = Arc::new(AtomicUsize::new(0));
    {
        let done_thread = Arc::clone(&done_thread);
        let done = Arc::clone(&done);
        q.queue(work(
            || {},
            move || {
                *done_thread.lock() = Some(thread::current().id());
                done.fetch_add(1, Ordering::SeqCst);
            },
        ));
    }
    drain_until(&engine, &done, 1);

    assert_eq!(*done_thread.lock(), Some(thread::current().id()));
}

#[test]
fn test_completions_are_exactly_once() {
    let engine = engine_with_nodes(2);
    let q = engine
        .new_queue("exactly-once", ThreadControl::Unlimited)
        .expect("queue creation");

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..500 {
        let done = Arc::clone(&done);
        q.queue(completion(move || {
            done.fetch_add(1, Ordering::SeqCst);
        }));
    }
    drain_until(&engine, &done, 500);

    // extra dispatch passes must not re-deliver anything
    engine.dispatch_completions();
    engine.dispatch_completions();
    assert_eq!(done.load(Ordering::SeqCst), 500);
}

#[test]
fn test_run_executes_before_done() {
    let engine = engine_with_nodes(1);
    let q = engine.ordered_queue("run-then-done").expect("queue creation");

    let ran = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let ran = Arc::clone(&ran);
        let done_ctr = Arc::clone(&done);
        let ran_check = Arc::clone(&ran);
        q.queue(work(
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                // every done must observe its own run
                assert!(ran_check.load(Ordering::SeqCst) > done_ctr.load(Ordering::SeqCst));
                done_ctr.fetch_add(1, Ordering::SeqCst);
            },
        ));
    }
    drain_until(&engine, &done, 50);
    assert_eq!(ran.load(Ordering::SeqCst), 50);
}

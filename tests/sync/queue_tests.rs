// Tests for the bounded-concurrency work queue

use docsync::sync::WorkQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Tracks how many units are running at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_in_flight_units_never_exceed_concurrency() {
    let gauge = Gauge::default();
    let mut queue = WorkQueue::new(3);
    for i in 0..12 {
        let gauge = &gauge;
        queue.enqueue(format!("unit-{}", i), move || async move {
            gauge.enter();
            tokio::time::sleep(Duration::from_millis(5)).await;
            gauge.leave();
            Ok(())
        });
    }

    let report = queue.execute().await;

    assert_eq!(report.completed, 12);
    assert!(report.failures.is_empty());
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
    assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_single_slot_runs_units_one_at_a_time() {
    let gauge = Gauge::default();
    let mut queue = WorkQueue::new(1);
    for i in 0..4 {
        let gauge = &gauge;
        queue.enqueue(format!("unit-{}", i), move || async move {
            gauge.enter();
            tokio::task::yield_now().await;
            gauge.leave();
            Ok(())
        });
    }

    queue.execute().await;
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_units_do_not_start_before_execute() {
    let started = AtomicUsize::new(0);
    let mut queue = WorkQueue::new(2);
    {
        let started = &started;
        queue.enqueue("lazy", move || async move {
            started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    tokio::task::yield_now().await;
    assert_eq!(started.load(Ordering::SeqCst), 0);

    queue.execute().await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_unit_keeps_error_chain() {
    let mut queue = WorkQueue::new(2);
    queue.enqueue("broken", || async {
        let err = anyhow::anyhow!("disk full");
        Err(err.context("Failed to write paper.pdf"))
    });

    let report = queue.execute().await;

    assert_eq!(report.succeeded(), 0);
    let error = &report.failures[0].error;
    assert!(error.contains("Failed to write paper.pdf"));
    assert!(error.contains("disk full"));
}

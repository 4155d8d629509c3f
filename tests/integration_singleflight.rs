//! Single-flight behavior of the snapshot store: concurrent callers for
//! one affiliate coalesce onto one upstream fetch, failures are shared,
//! and waiter cancellation never tears down the fetch itself.

mod common;

use common::{MockSource, tracker_with};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use wager_sync::TrackerError;

#[tokio::test]
async fn concurrent_cold_miss_issues_exactly_one_fetch() {
    common::init_tracing();
    let source = Arc::new(MockSource::ok(500.0).with_delay(Duration::from_millis(50)));
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = Arc::clone(tracker.snapshot_store());

    let mut tasks = JoinSet::new();
    for _ in 0..25 {
        let store = Arc::clone(&store);
        tasks.spawn(async move { store.get_or_refresh("A123", Duration::from_secs(60)).await });
    }

    while let Some(result) = tasks.join_next().await {
        let view = result
            .unwrap_or_else(|e| panic!("task panicked: {e}"))
            .unwrap_or_else(|e| panic!("fetch failed: {e}"));
        assert!((view.snapshot.total_wager - 500.0).abs() < f64::EPSILON);
    }

    assert_eq!(source.calls(), 1, "expected one coalesced upstream fetch");
    let stats = store.stats();
    assert_eq!(stats.refreshes, 1);
    assert!(stats.coalesced >= 1);
}

#[tokio::test]
async fn waiters_share_a_failed_fetch() {
    let source = Arc::new(MockSource::failing().with_delay(Duration::from_millis(30)));
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = Arc::clone(tracker.snapshot_store());

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let store = Arc::clone(&store);
        tasks.spawn(async move { store.get_or_refresh("A123", Duration::from_secs(60)).await });
    }

    while let Some(result) = tasks.join_next().await {
        let outcome = result.unwrap_or_else(|e| panic!("task panicked: {e}"));
        assert!(
            matches!(outcome, Err(TrackerError::Transient { .. })),
            "expected shared transient failure, got {outcome:?}"
        );
    }

    // The failure was produced once and broadcast; no retry storm.
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn cancelled_waiter_does_not_cancel_the_fetch() {
    let source = Arc::new(MockSource::ok(750.0).with_delay(Duration::from_millis(80)));
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = Arc::clone(tracker.snapshot_store());

    let early = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.get_or_refresh("A123", Duration::from_secs(60)).await })
    };
    // Let the leader start its fetch, then abandon the waiting caller.
    tokio::time::sleep(Duration::from_millis(20)).await;
    early.abort();
    assert!(early.await.is_err());

    // A second caller joins the still-running flight and gets the result.
    let view = store
        .get_or_refresh("A123", Duration::from_secs(60))
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));
    assert!((view.snapshot.total_wager - 750.0).abs() < f64::EPSILON);
    assert_eq!(
        source.calls(),
        1,
        "the detached fetch must have survived the cancelled caller"
    );
}

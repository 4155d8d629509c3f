//! Snapshot store semantics: staleness bound, negative caching, and
//! stale fallback on refresh failure.

mod common;

use common::{MockSource, Outcome, tracker_with};
use std::sync::Arc;
use std::time::Duration;
use wager_sync::{SourceStatus, TrackerError};

const LONG: Duration = Duration::from_secs(60);

#[tokio::test]
async fn fresh_snapshot_is_served_without_io() {
    let source = Arc::new(MockSource::ok(500.0));
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    let first = store
        .get_or_refresh("A123", LONG)
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));
    assert_eq!(first.snapshot.source_status, SourceStatus::Ok);
    assert_eq!(source.calls(), 1);

    // Within max_age: cache hit, no new upstream call.
    let second = store
        .get_or_refresh("A123", LONG)
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));
    assert_eq!(second.snapshot, first.snapshot);
    assert_eq!(source.calls(), 1);
    assert_eq!(store.stats().hits, 1);
}

#[tokio::test]
async fn expired_snapshot_triggers_exactly_one_refresh() {
    let source = Arc::new(MockSource::ok(500.0));
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    store
        .get_or_refresh("A123", Duration::from_millis(40))
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));
    assert_eq!(source.calls(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;

    store
        .get_or_refresh("A123", Duration::from_millis(40))
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));
    assert_eq!(source.calls(), 2, "expired read must refresh exactly once");
}

#[tokio::test]
async fn unknown_identity_is_negatively_cached() {
    let source = Arc::new(MockSource::not_found());
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    let first = store.get_or_refresh("ZZZ", LONG).await;
    assert!(matches!(
        first,
        Err(TrackerError::AffiliateNotFound { .. })
    ));
    assert_eq!(source.calls(), 1);

    // Immediately again: answered from the negative cache.
    let second = store.get_or_refresh("ZZZ", LONG).await;
    assert!(matches!(
        second,
        Err(TrackerError::AffiliateNotFound { .. })
    ));
    assert_eq!(source.calls(), 1);
    assert_eq!(store.stats().negative_hits, 1);

    // The tombstone is visible to a non-waiting read.
    let peeked = store
        .peek("ZZZ", LONG)
        .await
        .unwrap_or_else(|| panic!("tombstone missing"));
    assert_eq!(peeked.snapshot.source_status, SourceStatus::NotFound);
}

#[tokio::test]
async fn negative_cache_expires_and_retries_upstream() {
    // negative_ttl in the test config is 150ms.
    let source = Arc::new(MockSource::not_found());
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    let _ = store.get_or_refresh("ZZZ", LONG).await;
    assert_eq!(source.calls(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let _ = store.get_or_refresh("ZZZ", LONG).await;
    assert_eq!(source.calls(), 2, "expired tombstone must re-ask upstream");
}

#[tokio::test]
async fn transient_failure_with_prior_snapshot_serves_stale() {
    let source = Arc::new(
        MockSource::ok(500.0).script(
            "A123",
            vec![
                Outcome::Ok {
                    total: 500.0,
                    period: 500.0,
                },
                Outcome::Fail,
            ],
        ),
    );
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    store
        .get_or_refresh("A123", Duration::from_millis(30))
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));

    tokio::time::sleep(Duration::from_millis(50)).await;

    // The refresh fails, but the expired snapshot is still worth more
    // than an error to the read path.
    let fallback = store
        .get_or_refresh("A123", Duration::from_millis(30))
        .await
        .unwrap_or_else(|e| panic!("expected stale fallback, got error: {e}"));
    assert_eq!(fallback.snapshot.source_status, SourceStatus::StaleFallback);
    assert!((fallback.snapshot.total_wager - 500.0).abs() < f64::EPSILON);
    assert_eq!(store.stats().stale_served, 1);
}

#[tokio::test]
async fn transient_failure_without_prior_snapshot_surfaces() {
    let source = Arc::new(MockSource::failing());
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    match store.get_or_refresh("A123", LONG).await {
        Err(TrackerError::Transient { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected Transient, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_affiliate_id_is_rejected_without_io() {
    let source = Arc::new(MockSource::ok(1.0));
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    assert!(matches!(
        store.get_or_refresh("", LONG).await,
        Err(TrackerError::AffiliateNotFound { .. })
    ));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn successful_fetch_clears_the_tombstone() {
    let source = Arc::new(MockSource::ok(100.0).script(
        "A123",
        vec![
            Outcome::NotFound,
            Outcome::Ok {
                total: 100.0,
                period: 100.0,
            },
        ],
    ));
    let tracker = tracker_with(Arc::clone(&source)).unwrap_or_else(|e| panic!("setup: {e}"));
    let store = tracker.snapshot_store();

    let _ = store.get_or_refresh("A123", LONG).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let view = store
        .get_or_refresh("A123", LONG)
        .await
        .unwrap_or_else(|e| panic!("fetch failed: {e}"));
    assert!((view.snapshot.total_wager - 100.0).abs() < f64::EPSILON);

    // The identity is known again; no negative answer remains.
    let peeked = store
        .peek("A123", LONG)
        .await
        .unwrap_or_else(|| panic!("snapshot missing"));
    assert_eq!(peeked.snapshot.source_status, SourceStatus::Ok);
}

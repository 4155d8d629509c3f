//! Snapshot store: the cache of upstream data.
//!
//! Owns the current snapshot per affiliate identity, coordinates
//! refreshes so that N concurrent callers during a cache miss produce
//! exactly one upstream fetch (single-flight), caches negative results,
//! and masks transient upstream failures with stale data where possible.
//!
//! # Single-flight
//!
//! The in-flight table maps each affiliate to a watch channel carrying
//! the eventual fetch completion. The first caller to miss becomes the
//! leader: it spawns a *detached* fetch task and subscribes like everyone
//! else. Followers find the existing channel and wait on it. Because the
//! fetch runs on its own task, a caller that gives up (is cancelled)
//! never tears down a fetch that other waiters or the scheduler depend
//! on; only the source's own timeout terminates it.
//!
//! # Write ordering
//!
//! Completions are applied in completion order, guarded by `fetched_at`:
//! an older, slower fetch that completes after a newer one must not
//! overwrite the newer snapshot.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::TrackerError;
use crate::traits::WagerSource;
use crate::types::{SourceStatus, WagerSnapshot};

/// Store-level tunables, carved out of the tracker configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a "not found" result suppresses further upstream lookups.
    pub negative_ttl: Duration,
    /// Capacity of the negative cache.
    pub negative_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            negative_ttl: Duration::from_secs(60),
            negative_capacity: 10_000,
        }
    }
}

/// A snapshot as returned to callers, with refresh metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotView {
    pub snapshot: WagerSnapshot,
    /// Whether a refresh for this affiliate is still outstanding.
    pub refresh_pending: bool,
}

/// Snapshot plus the monotonic instant it was stored, for age checks.
#[derive(Debug, Clone)]
struct StoredSnapshot {
    snapshot: WagerSnapshot,
    stored_at: Instant,
}

impl StoredSnapshot {
    fn new(snapshot: WagerSnapshot) -> Self {
        Self {
            snapshot,
            stored_at: Instant::now(),
        }
    }

    fn is_fresh(&self, max_age: Duration) -> bool {
        self.stored_at.elapsed() <= max_age
    }
}

/// Shared result of one fetch, broadcast to every waiter.
#[derive(Debug, Clone)]
enum FetchCompletion {
    /// The store now holds this snapshot (possibly a newer one that
    /// superseded the fetch while it ran).
    Stored(WagerSnapshot),
    NotFound,
    Failed { attempts: u32, reason: String },
}

type InFlightMap = DashMap<String, watch::Receiver<Option<FetchCompletion>>>;

/// Removes the in-flight entry when the fetch task finishes, even if it
/// panics partway through.
struct InFlightGuard {
    map: Arc<InFlightMap>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

#[derive(Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    coalesced: AtomicU64,
    stale_served: AtomicU64,
    negative_hits: AtomicU64,
    anomalies: AtomicU64,
    out_of_order: AtomicU64,
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub coalesced: u64,
    pub stale_served: u64,
    pub negative_hits: u64,
    pub anomalies: u64,
    pub out_of_order: u64,
    pub in_flight: usize,
    pub snapshots: usize,
}

/// Cache of wager snapshots with per-key single-flight refresh.
pub struct SnapshotStore {
    source: Arc<dyn WagerSource>,
    snapshots: Arc<DashMap<String, StoredSnapshot>>,
    in_flight: Arc<InFlightMap>,
    negative: moka::future::Cache<String, WagerSnapshot>,
    counters: Arc<StoreCounters>,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(source: Arc<dyn WagerSource>, config: StoreConfig) -> Self {
        let negative = moka::future::Cache::builder()
            .max_capacity(config.negative_capacity)
            .time_to_live(config.negative_ttl)
            .build();
        Self {
            source,
            snapshots: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            negative,
            counters: Arc::new(StoreCounters::default()),
        }
    }

    /// Return the snapshot for `affiliate_id`, refreshing it if older
    /// than `max_age`.
    ///
    /// A snapshot younger than `max_age` is returned without any network
    /// I/O. Otherwise the caller joins the single-flight refresh for the
    /// key and waits for its completion. On a transient failure the most
    /// recent snapshot, if any, is served marked
    /// [`SourceStatus::StaleFallback`] instead of failing the read.
    ///
    /// # Errors
    ///
    /// [`TrackerError::AffiliateNotFound`] for unknown identities (served
    /// from the negative cache while its TTL lasts), or
    /// [`TrackerError::Transient`] when the refresh failed and no prior
    /// snapshot exists to fall back on.
    pub async fn get_or_refresh(
        &self,
        affiliate_id: &str,
        max_age: Duration,
    ) -> Result<SnapshotView, TrackerError> {
        if affiliate_id.is_empty() {
            return Err(TrackerError::AffiliateNotFound {
                affiliate_id: String::new(),
            });
        }

        // Fast path: fresh snapshot, no coordination needed.
        if let Some(stored) = self.snapshots.get(affiliate_id) {
            if stored.is_fresh(max_age) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                let snapshot = stored.snapshot.clone();
                drop(stored);
                return Ok(SnapshotView {
                    snapshot,
                    refresh_pending: self.in_flight.contains_key(affiliate_id),
                });
            }
        }

        // Known-missing identity: answer from the negative cache without
        // touching the upstream.
        if self.negative.get(affiliate_id).await.is_some() {
            self.counters.negative_hits.fetch_add(1, Ordering::Relaxed);
            return Err(TrackerError::AffiliateNotFound {
                affiliate_id: affiliate_id.to_string(),
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let rx = self.join_flight(affiliate_id);
        let completion = wait_for_completion(rx).await;

        match completion {
            FetchCompletion::Stored(snapshot) => Ok(SnapshotView {
                snapshot,
                refresh_pending: false,
            }),
            FetchCompletion::NotFound => Err(TrackerError::AffiliateNotFound {
                affiliate_id: affiliate_id.to_string(),
            }),
            FetchCompletion::Failed { attempts, reason } => {
                if let Some(stored) = self.snapshots.get(affiliate_id) {
                    // Stale beats nothing on a non-critical read path. The
                    // marker keeps the degradation observable to operators
                    // without failing the end user.
                    self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                    let mut snapshot = stored.snapshot.clone();
                    drop(stored);
                    snapshot.source_status = SourceStatus::StaleFallback;
                    warn!(
                        affiliate = %affiliate_id,
                        reason = %reason,
                        "refresh failed, serving stale snapshot"
                    );
                    Ok(SnapshotView {
                        snapshot,
                        refresh_pending: false,
                    })
                } else {
                    Err(TrackerError::Transient { attempts, reason })
                }
            }
        }
    }

    /// Non-waiting read: the last known snapshot, if any.
    ///
    /// A snapshot older than `max_age` is marked
    /// [`SourceStatus::StaleFallback`]; `refresh_pending` tells whether a
    /// refresh is currently outstanding. Never triggers a fetch. An
    /// identity in the negative cache is reported with its tombstone
    /// ([`SourceStatus::NotFound`]).
    pub async fn peek(&self, affiliate_id: &str, max_age: Duration) -> Option<SnapshotView> {
        if let Some(stored) = self.snapshots.get(affiliate_id) {
            let mut snapshot = stored.snapshot.clone();
            let fresh = stored.is_fresh(max_age);
            drop(stored);
            if !fresh {
                snapshot.source_status = SourceStatus::StaleFallback;
            }
            return Some(SnapshotView {
                snapshot,
                refresh_pending: self.in_flight.contains_key(affiliate_id),
            });
        }
        self.negative
            .get(affiliate_id)
            .await
            .map(|tombstone| SnapshotView {
                snapshot: tombstone,
                refresh_pending: self.in_flight.contains_key(affiliate_id),
            })
    }

    #[must_use]
    pub fn stats(&self) -> SnapshotStoreStats {
        SnapshotStoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            negative_hits: self.counters.negative_hits.load(Ordering::Relaxed),
            anomalies: self.counters.anomalies.load(Ordering::Relaxed),
            out_of_order: self.counters.out_of_order.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
            snapshots: self.snapshots.len(),
        }
    }

    /// Subscribe to the in-flight fetch for `affiliate_id`, spawning it
    /// if this caller is first.
    fn join_flight(&self, affiliate_id: &str) -> watch::Receiver<Option<FetchCompletion>> {
        let mut leader_tx = None;
        let rx = match self.in_flight.entry(affiliate_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                existing.get().clone()
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                leader_tx = Some(tx);
                rx
            }
        };

        // Spawn outside the map borrow so the task can remove its entry
        // without contending on the shard we just touched.
        if let Some(tx) = leader_tx {
            self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
            let task = FetchTask {
                source: Arc::clone(&self.source),
                snapshots: Arc::clone(&self.snapshots),
                in_flight: Arc::clone(&self.in_flight),
                negative: self.negative.clone(),
                counters: Arc::clone(&self.counters),
                affiliate_id: affiliate_id.to_string(),
            };
            tokio::spawn(task.run(tx));
        }
        rx
    }

    /// Apply a fetched snapshot, guarding against out-of-order
    /// completions and flagging wager regressions. Returns the snapshot
    /// the store holds afterwards.
    fn apply(
        snapshots: &DashMap<String, StoredSnapshot>,
        counters: &StoreCounters,
        snapshot: WagerSnapshot,
    ) -> WagerSnapshot {
        match snapshots.entry(snapshot.affiliate_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut current) => {
                let held = &current.get().snapshot;
                if held.fetched_at > snapshot.fetched_at {
                    counters.out_of_order.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        affiliate = %snapshot.affiliate_id,
                        "dropping out-of-order fetch completion"
                    );
                    return held.clone();
                }
                if held.source_status == SourceStatus::Ok
                    && snapshot.source_status == SourceStatus::Ok
                    && snapshot.total_wager < held.total_wager
                {
                    counters.anomalies.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        affiliate = %snapshot.affiliate_id,
                        previous = held.total_wager,
                        current = snapshot.total_wager,
                        "total wager decreased between snapshots"
                    );
                }
                current.insert(StoredSnapshot::new(snapshot.clone()));
                snapshot
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(StoredSnapshot::new(snapshot.clone()));
                snapshot
            }
        }
    }
}

/// One detached refresh: fetch, apply, broadcast, clean up.
struct FetchTask {
    source: Arc<dyn WagerSource>,
    snapshots: Arc<DashMap<String, StoredSnapshot>>,
    in_flight: Arc<InFlightMap>,
    negative: moka::future::Cache<String, WagerSnapshot>,
    counters: Arc<StoreCounters>,
    affiliate_id: String,
}

impl FetchTask {
    async fn run(self, tx: watch::Sender<Option<FetchCompletion>>) {
        let _cleanup = InFlightGuard {
            map: Arc::clone(&self.in_flight),
            key: self.affiliate_id.clone(),
        };

        let completion = match self.source.fetch(&self.affiliate_id).await {
            Ok(snapshot) => {
                // The identity clearly exists again; drop any tombstone.
                self.negative.invalidate(&self.affiliate_id).await;
                let stored = SnapshotStore::apply(&self.snapshots, &self.counters, snapshot);
                FetchCompletion::Stored(stored)
            }
            Err(TrackerError::AffiliateNotFound { .. }) => {
                self.negative
                    .insert(
                        self.affiliate_id.clone(),
                        WagerSnapshot::not_found(&self.affiliate_id),
                    )
                    .await;
                FetchCompletion::NotFound
            }
            Err(TrackerError::Transient { attempts, reason }) => {
                FetchCompletion::Failed { attempts, reason }
            }
            Err(other) => FetchCompletion::Failed {
                attempts: 1,
                reason: other.to_string(),
            },
        };

        // Waiters holding a receiver see the result even if they
        // subscribed before we got here; receivers subscribing after the
        // in-flight entry is gone will start a fresh flight instead.
        let _ = tx.send(Some(completion));
    }
}

async fn wait_for_completion(
    mut rx: watch::Receiver<Option<FetchCompletion>>,
) -> FetchCompletion {
    loop {
        let published = (*rx.borrow()).clone();
        if let Some(completion) = published {
            return completion;
        }
        if rx.changed().await.is_err() {
            // Fetch task dropped its sender without publishing: it was
            // aborted by the runtime shutting down.
            return FetchCompletion::Failed {
                attempts: 0,
                reason: "fetch task aborted".to_string(),
            };
        }
    }
}

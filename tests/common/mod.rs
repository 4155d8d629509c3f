//! Common utilities for integration tests: a scriptable upstream source,
//! tracker construction helpers, and test configuration with fast
//! timings.

use anyhow::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};
use wager_sync::{
    MilestoneDefinition, MilestoneLadder, Platform, SourceStatus, TrackerConfig, TrackerError,
    WagerSnapshot, WagerSource, WagerTracker, async_trait,
};

/// One scripted upstream outcome.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Ok { total: f64, period: f64 },
    NotFound,
    Fail,
}

/// Scriptable [`WagerSource`] that counts fetch invocations.
///
/// Outcomes can be scripted per affiliate id; the last outcome in a
/// script repeats forever. Identities without a script use the default
/// outcome. An optional delay simulates upstream latency.
pub struct MockSource {
    calls: AtomicU32,
    per_id_calls: DashMap<String, u32>,
    scripts: DashMap<String, Mutex<VecDeque<Outcome>>>,
    default_outcome: Outcome,
    delay: Option<Duration>,
}

impl MockSource {
    pub fn with_default(outcome: Outcome) -> Self {
        Self {
            calls: AtomicU32::new(0),
            per_id_calls: DashMap::new(),
            scripts: DashMap::new(),
            default_outcome: outcome,
            delay: None,
        }
    }

    /// Every identity succeeds with this total.
    pub fn ok(total: f64) -> Self {
        Self::with_default(Outcome::Ok {
            total,
            period: total,
        })
    }

    /// Every identity is unknown.
    pub fn not_found() -> Self {
        Self::with_default(Outcome::NotFound)
    }

    /// Every fetch fails transiently.
    pub fn failing() -> Self {
        Self::with_default(Outcome::Fail)
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Script outcomes for one identity; the final outcome repeats.
    #[must_use]
    pub fn script(self, affiliate_id: &str, outcomes: Vec<Outcome>) -> Self {
        self.scripts
            .insert(affiliate_id.to_string(), Mutex::new(outcomes.into()));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, affiliate_id: &str) -> u32 {
        self.per_id_calls
            .get(affiliate_id)
            .map(|count| *count)
            .unwrap_or(0)
    }

    fn next_outcome(&self, affiliate_id: &str) -> Outcome {
        match self.scripts.get(affiliate_id) {
            Some(script) => {
                let mut queue = script.lock();
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or(self.default_outcome)
                } else {
                    queue.front().copied().unwrap_or(self.default_outcome)
                }
            }
            None => self.default_outcome,
        }
    }
}

#[async_trait]
impl WagerSource for MockSource {
    async fn fetch(&self, affiliate_id: &str) -> Result<WagerSnapshot, TrackerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_id_calls
            .entry(affiliate_id.to_string())
            .or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_outcome(affiliate_id) {
            Outcome::Ok { total, period } => Ok(WagerSnapshot {
                affiliate_id: affiliate_id.to_string(),
                total_wager: total,
                period_wager: period,
                raw_payload_digest: "mock".to_string(),
                fetched_at: SystemTime::now(),
                source_status: SourceStatus::Ok,
            }),
            Outcome::NotFound => Err(TrackerError::AffiliateNotFound {
                affiliate_id: affiliate_id.to_string(),
            }),
            Outcome::Fail => Err(TrackerError::Transient {
                attempts: 3,
                reason: "scripted failure".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Configuration with timings small enough for tests.
pub fn test_config() -> TrackerConfig {
    TrackerConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        request_timeout: Duration::from_millis(500),
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(5),
        cache_ttl: Duration::from_millis(200),
        proactive_ttl: Duration::from_millis(100),
        refresh_interval: Duration::from_millis(50),
        negative_ttl: Duration::from_millis(150),
        stagger: Duration::from_millis(1),
        refresh_concurrency: 4,
        ..TrackerConfig::default()
    }
}

/// Ladder used by the façade scenarios: thresholds 100 / 500 / 1000.
pub fn small_ladder() -> MilestoneLadder {
    MilestoneLadder::new(vec![
        MilestoneDefinition {
            tier_id: 1,
            threshold: 100.0,
            bonus: 1.0,
        },
        MilestoneDefinition {
            tier_id: 2,
            threshold: 500.0,
            bonus: 5.0,
        },
        MilestoneDefinition {
            tier_id: 3,
            threshold: 1000.0,
            bonus: 10.0,
        },
    ])
}

/// Build a tracker around a mock source with test timings.
pub fn tracker_with(source: Arc<MockSource>) -> Result<Arc<WagerTracker>> {
    let tracker = WagerTracker::builder()
        .with_config(test_config())
        .with_source(source)
        .with_ladder(small_ladder())
        .build()?;
    Ok(Arc::new(tracker))
}

/// Register and return the standard test user.
pub fn register_default_user(tracker: &WagerTracker, affiliate_id: &str) -> Result<()> {
    tracker.register(Platform::Telegram, "u1", affiliate_id)?;
    Ok(())
}

/// Install a test subscriber once so `RUST_LOG` works in tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//! Wager Sync
//!
//! Affiliate wager synchronization and milestone engine:
//! - **Snapshot cache**: one current snapshot per affiliate identity with
//!   explicit freshness, served without I/O while within TTL
//! - **Single-flight refresh**: N concurrent callers during a cache miss
//!   produce exactly one upstream fetch
//! - **Negative caching**: unknown identities are remembered briefly so
//!   bad lookups do not hammer the upstream
//! - **Stale fallback**: transient upstream failures are masked with the
//!   last known snapshot, visibly marked
//! - **Retrying HTTP client**: bounded attempts, exponential backoff with
//!   full jitter, non-retryable classification for terminal outcomes
//! - **Background refresh**: staggered, concurrency-capped scheduler that
//!   keeps registered identities warm
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wager_sync::{Platform, TrackerConfig, WagerTracker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wager_sync::TrackerError> {
//!     let tracker = WagerTracker::new(TrackerConfig::from_env()?)?;
//!     tracker.register(Platform::Telegram, "u1", "A123")?;
//!     tracker.start_scheduler();
//!
//!     let status = tracker.get_wager_status(Platform::Telegram, "u1").await?;
//!     tracing::info!(
//!         total = status.snapshot.total_wager,
//!         achieved = status.milestones.iter().filter(|m| m.achieved).count(),
//!         "wager status"
//!     );
//!
//!     tracker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! adapter → WagerTracker ── RegistrationStore (platform user → affiliate)
//!              │
//!              ├── SnapshotStore ──miss──→ HttpWagerSource → upstream
//!              │     hit ↓                  (retry/backoff/timeout)
//!              │   single-flight, negative cache, stale fallback
//!              │
//!              └── MilestoneLadder + AchievementLog
//! RefreshScheduler ─┘ (background, staggered, concurrency-capped)
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

pub mod builder;
pub mod commands;
pub mod config;
pub mod error;
pub mod milestones;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod traits;
pub mod types;

pub use builder::WagerTrackerBuilder;
pub use commands::{CommandReply, CommandRequest, CommandRouter};
pub use config::TrackerConfig;
pub use error::TrackerError;
pub use milestones::{
    AchievementLog, MilestoneDefinition, MilestoneLadder, MilestoneProgress, NextMilestone,
};
pub use registry::RegistrationStore;
pub use retry::{FailureClass, FetchFailure, RetryPolicy};
pub use scheduler::{RefreshScheduler, SchedulerConfig, SchedulerHandle, SchedulerState};
pub use source::HttpWagerSource;
pub use store::{SnapshotStore, SnapshotStoreStats, SnapshotView, StoreConfig};
pub use traits::WagerSource;
pub use types::{Platform, Registration, SourceStatus, WagerSnapshot};

// Re-export async_trait for custom WagerSource implementations.
pub use async_trait::async_trait;

/// Result of a wager status query.
#[derive(Debug)]
pub struct WagerStatus {
    pub snapshot: WagerSnapshot,
    /// Ladder evaluation against the snapshot, ascending by threshold.
    pub milestones: Vec<MilestoneProgress>,
    /// Tiers first observed as achieved during this query. A host that
    /// pushes notifications acts on these; polling hosts can ignore them.
    pub newly_achieved: Vec<u32>,
    /// Whether a background refresh for this affiliate is outstanding.
    pub refresh_pending: bool,
}

/// Milestone-centric view for the `milestones` command.
#[derive(Debug)]
pub struct MilestoneReport {
    pub affiliate_id: String,
    pub total_wager: f64,
    pub milestones: Vec<MilestoneProgress>,
    pub next_milestone: Option<NextMilestone>,
}

/// The engine façade platform adapters talk to.
///
/// Owns the registration store, the snapshot store, the milestone ladder
/// with its achievement log, and (once started) the background refresh
/// scheduler. The scheduler and every query caller share the *same*
/// snapshot store instance, so refresh work is never duplicated between
/// them.
pub struct WagerTracker {
    config: TrackerConfig,
    registry: Arc<RegistrationStore>,
    store: Arc<SnapshotStore>,
    ladder: Arc<MilestoneLadder>,
    achievements: AchievementLog,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl WagerTracker {
    /// Create a tracker over the HTTP upstream client.
    ///
    /// # Errors
    ///
    /// [`TrackerError::Configuration`] on invalid configuration.
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        WagerTrackerBuilder::new().with_config(config).build()
    }

    /// Start building a tracker with custom parts.
    #[must_use]
    pub fn builder() -> WagerTrackerBuilder {
        WagerTrackerBuilder::new()
    }

    pub(crate) fn from_parts(
        config: TrackerConfig,
        source: Arc<dyn WagerSource>,
        ladder: MilestoneLadder,
    ) -> Self {
        let store_config = StoreConfig {
            negative_ttl: config.negative_ttl,
            ..StoreConfig::default()
        };
        Self {
            registry: Arc::new(RegistrationStore::new()),
            store: Arc::new(SnapshotStore::new(source, store_config)),
            ladder: Arc::new(ladder),
            achievements: AchievementLog::new(),
            scheduler: Mutex::new(None),
            config,
        }
    }

    /// Register a platform user against an affiliate identity.
    ///
    /// # Errors
    ///
    /// See [`RegistrationStore::register`].
    pub fn register(
        &self,
        platform: Platform,
        platform_user_id: &str,
        affiliate_id: &str,
    ) -> Result<Registration, TrackerError> {
        self.registry.register(platform, platform_user_id, affiliate_id)
    }

    /// Remove a registration. Cached snapshots are left alone: another
    /// user may share the affiliate, and a re-registration should not
    /// start cold.
    ///
    /// # Errors
    ///
    /// See [`RegistrationStore::unregister`].
    pub fn unregister(
        &self,
        platform: Platform,
        platform_user_id: &str,
    ) -> Result<Registration, TrackerError> {
        self.registry.unregister(platform, platform_user_id)
    }

    /// Current snapshot and milestone progress for a platform user.
    ///
    /// Resolves the affiliate, reads through the snapshot store with the
    /// read-path TTL, evaluates the ladder, and stamps first-crossing
    /// times from the achievement log.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotRegistered`] for an unknown user, plus any
    /// unmasked store error ([`TrackerError::AffiliateNotFound`],
    /// [`TrackerError::Transient`]).
    pub async fn get_wager_status(
        &self,
        platform: Platform,
        platform_user_id: &str,
    ) -> Result<WagerStatus, TrackerError> {
        let affiliate_id = self.registry.resolve(platform, platform_user_id)?;
        let view = self
            .store
            .get_or_refresh(&affiliate_id, self.config.cache_ttl)
            .await?;
        let mut milestones = self.ladder.evaluate(&view.snapshot);
        let newly_achieved = self.achievements.observe(&view.snapshot, &mut milestones);
        Ok(WagerStatus {
            snapshot: view.snapshot,
            milestones,
            newly_achieved,
            refresh_pending: view.refresh_pending,
        })
    }

    /// Milestone-centric view for a platform user: full ladder state plus
    /// the next unachieved tier.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_wager_status`].
    pub async fn get_milestones(
        &self,
        platform: Platform,
        platform_user_id: &str,
    ) -> Result<MilestoneReport, TrackerError> {
        let affiliate_id = self.registry.resolve(platform, platform_user_id)?;
        let view = self
            .store
            .get_or_refresh(&affiliate_id, self.config.cache_ttl)
            .await?;
        let mut milestones = self.ladder.evaluate(&view.snapshot);
        self.achievements.observe(&view.snapshot, &mut milestones);
        Ok(MilestoneReport {
            affiliate_id,
            total_wager: view.snapshot.total_wager,
            milestones,
            next_milestone: self.ladder.next_milestone(&view.snapshot),
        })
    }

    /// Start the background refresh scheduler. A no-op if one is already
    /// running.
    pub fn start_scheduler(&self) {
        let mut slot = self.scheduler.lock();
        if let Some(handle) = slot.as_ref() {
            if handle.state() != SchedulerState::Stopped {
                return;
            }
        }
        *slot = Some(RefreshScheduler::spawn(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            SchedulerConfig {
                interval: self.config.refresh_interval,
                proactive_ttl: self.config.proactive_ttl,
                stagger: self.config.stagger,
                concurrency: self.config.refresh_concurrency,
            },
        ));
    }

    /// Gracefully stop the scheduler, if running. In-flight refreshes
    /// finish; no new cycle starts.
    pub async fn shutdown(&self) {
        // Taken out of the slot while stopping so the lock is not held
        // across the await, then put back so the final state stays
        // queryable.
        let handle = self.scheduler.lock().take();
        if let Some(mut handle) = handle {
            handle.stop().await;
            *self.scheduler.lock() = Some(handle);
        }
    }

    /// Scheduler lifecycle state, if one was ever started.
    #[must_use]
    pub fn scheduler_state(&self) -> Option<SchedulerState> {
        self.scheduler.lock().as_ref().map(SchedulerHandle::state)
    }

    /// The shared snapshot store.
    #[must_use]
    pub fn snapshot_store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// The registration store.
    #[must_use]
    pub fn registrations(&self) -> &Arc<RegistrationStore> {
        &self.registry
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

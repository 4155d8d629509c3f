//! Background refresh scheduler.
//!
//! Periodically walks the distinct affiliate identities in the
//! registration store and refreshes each through the snapshot store, so
//! user-facing reads mostly hit a warm cache. Launches are staggered and
//! capped so a cycle never bursts the upstream rate limit, and a slow or
//! failing identity never blocks the rest of the cycle.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::registry::RegistrationStore;
use crate::store::SnapshotStore;
use crate::types::SourceStatus;

/// Scheduler lifecycle: `Idle → Running → Idle` per cycle, `Stopped`
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Pacing knobs for the refresh loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between cycles.
    pub interval: Duration,
    /// TTL passed to the store; kept below the read-path TTL so the
    /// scheduler refreshes before users would see staleness.
    pub proactive_ttl: Duration,
    /// Delay between launching consecutive refreshes within a cycle.
    pub stagger: Duration,
    /// Maximum refreshes outstanding at once within a cycle.
    pub concurrency: usize,
}

/// Handle to a spawned scheduler.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    state: Arc<Mutex<SchedulerState>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Request a graceful stop and wait for the loop to finish.
    ///
    /// No new cycle starts after the request; refreshes already in
    /// flight are allowed to complete. Stopping twice is a no-op.
    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            if task.await.is_err() {
                warn!("scheduler task panicked during shutdown");
            }
        }
    }
}

/// Periodic refresher over all registered affiliate identities.
pub struct RefreshScheduler {
    registry: Arc<RegistrationStore>,
    store: Arc<SnapshotStore>,
    config: SchedulerConfig,
}

impl RefreshScheduler {
    /// Spawn the refresh loop. The first cycle starts immediately.
    #[must_use]
    pub fn spawn(
        registry: Arc<RegistrationStore>,
        store: Arc<SnapshotStore>,
        config: SchedulerConfig,
    ) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(SchedulerState::Idle));
        let scheduler = Self {
            registry,
            store,
            config,
        };
        let task = tokio::spawn(scheduler.run(stop_rx, Arc::clone(&state)));
        info!("refresh scheduler started");
        SchedulerHandle {
            stop: stop_tx,
            state,
            task: Some(task),
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>, state: Arc<Mutex<SchedulerState>>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => {}
            }
            if *stop.borrow() {
                break;
            }

            *state.lock() = SchedulerState::Running;
            self.run_cycle(&mut stop).await;
            *state.lock() = SchedulerState::Idle;

            if *stop.borrow() {
                break;
            }
        }

        *state.lock() = SchedulerState::Stopped;
        info!("refresh scheduler stopped");
    }

    async fn run_cycle(&self, stop: &mut watch::Receiver<bool>) {
        let affiliates = self.registry.distinct_affiliates();
        if affiliates.is_empty() {
            return;
        }
        debug!(count = affiliates.len(), "starting refresh cycle");

        let mut outstanding = JoinSet::new();
        for affiliate_id in affiliates {
            if *stop.borrow() {
                // Stop requested mid-cycle: launch nothing further, let
                // what is outstanding drain below.
                break;
            }
            while outstanding.len() >= self.config.concurrency {
                let _ = outstanding.join_next().await;
            }

            let store = Arc::clone(&self.store);
            let ttl = self.config.proactive_ttl;
            outstanding.spawn(async move {
                match store.get_or_refresh(&affiliate_id, ttl).await {
                    Ok(view) if view.snapshot.source_status == SourceStatus::StaleFallback => {
                        warn!(affiliate = %affiliate_id, "proactive refresh served stale data");
                    }
                    Ok(_) => {}
                    Err(error) => {
                        // One failing identity must not take down the
                        // cycle; the failure is already observable here.
                        warn!(affiliate = %affiliate_id, %error, "proactive refresh failed");
                    }
                }
            });

            tokio::select! {
                () = tokio::time::sleep(self.config.stagger) => {}
                _ = stop.changed() => {}
            }
        }

        while outstanding.join_next().await.is_some() {}
    }
}

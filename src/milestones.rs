//! Milestone ladder and achievement evaluation.
//!
//! Evaluation is a pure function of a snapshot and the ladder: no hidden
//! state, so repeated evaluation of the same snapshot always yields the
//! same achieved set. First-crossing bookkeeping (when was each tier
//! first observed as achieved) lives in [`AchievementLog`], outside the
//! pure engine.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::info;

use crate::types::WagerSnapshot;

/// One fixed wager threshold with its payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDefinition {
    pub tier_id: u32,
    pub threshold: f64,
    pub bonus: f64,
}

/// Achievement state of one tier against a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneProgress {
    pub tier_id: u32,
    pub threshold: f64,
    pub bonus: f64,
    pub achieved: bool,
    /// `fetched_at` of the first snapshot observed to cross the tier.
    /// Only populated once an [`AchievementLog`] has seen the crossing.
    pub achieved_at: Option<SystemTime>,
}

/// The next tier a snapshot has not reached yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextMilestone {
    pub tier_id: u32,
    pub threshold: f64,
    pub bonus: f64,
    /// Wager still missing to reach the threshold.
    pub remaining: f64,
    /// Fraction of the threshold already wagered, in `[0, 1)`.
    pub progress: f64,
}

/// Immutable, ascending ladder of milestone tiers.
///
/// Loaded once at construction and fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct MilestoneLadder {
    tiers: Vec<MilestoneDefinition>,
}

impl Default for MilestoneLadder {
    /// The stock ladder: $10 at 10k, $15 at 25k, $25 at 50k, $50 at 100k.
    fn default() -> Self {
        Self::new(vec![
            MilestoneDefinition {
                tier_id: 1,
                threshold: 10_000.0,
                bonus: 10.0,
            },
            MilestoneDefinition {
                tier_id: 2,
                threshold: 25_000.0,
                bonus: 15.0,
            },
            MilestoneDefinition {
                tier_id: 3,
                threshold: 50_000.0,
                bonus: 25.0,
            },
            MilestoneDefinition {
                tier_id: 4,
                threshold: 100_000.0,
                bonus: 50.0,
            },
        ])
    }
}

impl MilestoneLadder {
    /// Build a ladder, sorting tiers ascending by threshold.
    #[must_use]
    pub fn new(mut tiers: Vec<MilestoneDefinition>) -> Self {
        tiers.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
        Self { tiers }
    }

    #[must_use]
    pub fn tiers(&self) -> &[MilestoneDefinition] {
        &self.tiers
    }

    /// Evaluate every tier against a snapshot, ascending.
    ///
    /// A tier is achieved iff `total_wager >= threshold`; the boundary is
    /// inclusive. `achieved_at` is left unset; it is the caller's
    /// [`AchievementLog`] that knows first-crossing times.
    #[must_use]
    pub fn evaluate(&self, snapshot: &WagerSnapshot) -> Vec<MilestoneProgress> {
        self.tiers
            .iter()
            .map(|tier| MilestoneProgress {
                tier_id: tier.tier_id,
                threshold: tier.threshold,
                bonus: tier.bonus,
                achieved: snapshot.total_wager >= tier.threshold,
                achieved_at: None,
            })
            .collect()
    }

    /// The first tier the snapshot has not achieved, with remaining amount
    /// and progress fraction. `None` once every tier is achieved.
    #[must_use]
    pub fn next_milestone(&self, snapshot: &WagerSnapshot) -> Option<NextMilestone> {
        self.tiers
            .iter()
            .find(|tier| snapshot.total_wager < tier.threshold)
            .map(|tier| NextMilestone {
                tier_id: tier.tier_id,
                threshold: tier.threshold,
                bonus: tier.bonus,
                remaining: tier.threshold - snapshot.total_wager,
                progress: if tier.threshold > 0.0 {
                    (snapshot.total_wager / tier.threshold).clamp(0.0, 1.0)
                } else {
                    0.0
                },
            })
    }
}

/// First-crossing bookkeeping across snapshots.
///
/// Records, per (affiliate, tier), the `fetched_at` of the first snapshot
/// observed to cross the threshold. Observing the same crossing again is
/// a no-op, so achievement reporting stays idempotent.
#[derive(Default)]
pub struct AchievementLog {
    achieved: DashMap<(String, u32), SystemTime>,
}

impl AchievementLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `achieved_at` on achieved tiers and return the tier ids that
    /// crossed for the first time during this observation.
    pub fn observe(&self, snapshot: &WagerSnapshot, progress: &mut [MilestoneProgress]) -> Vec<u32> {
        let mut newly_achieved = Vec::new();
        for tier in progress.iter_mut().filter(|tier| tier.achieved) {
            let key = (snapshot.affiliate_id.clone(), tier.tier_id);
            match self.achieved.entry(key) {
                dashmap::mapref::entry::Entry::Occupied(first) => {
                    tier.achieved_at = Some(*first.get());
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(snapshot.fetched_at);
                    tier.achieved_at = Some(snapshot.fetched_at);
                    newly_achieved.push(tier.tier_id);
                }
            }
        }
        if !newly_achieved.is_empty() {
            info!(
                affiliate = %snapshot.affiliate_id,
                tiers = ?newly_achieved,
                total_wager = snapshot.total_wager,
                "new milestones achieved"
            );
        }
        newly_achieved
    }
}

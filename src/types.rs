//! Shared data model: platforms, registrations, snapshots, and the
//! upstream payload shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Chat platform a user registers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Discord,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telegram => f.write_str("telegram"),
            Self::Discord => f.write_str("discord"),
        }
    }
}

/// A (platform, user) → affiliate binding.
///
/// Created once on registration, never mutated, removed only by an explicit
/// unregistration. One affiliate may be registered by several platform
/// users (shared tracking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub platform: Platform,
    pub platform_user_id: String,
    pub affiliate_id: String,
    pub registered_at: SystemTime,
}

/// Where a returned snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Freshly fetched (or within TTL) from the upstream.
    Ok,
    /// Negative result: the upstream does not know this identity.
    NotFound,
    /// Served from an expired snapshot because a refresh failed or is
    /// still outstanding.
    StaleFallback,
}

/// The most recently fetched wager statistics for one affiliate identity.
///
/// Exactly one current snapshot exists per affiliate; a successful fetch
/// overwrites the previous one. `total_wager` is expected to be
/// monotonically non-decreasing across consecutive `Ok` snapshots; the
/// store logs a decrease as a data anomaly rather than silently trusting
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerSnapshot {
    pub affiliate_id: String,
    /// Cumulative all-time wager across the affiliate's referrals.
    pub total_wager: f64,
    /// Wager accumulated in the current period (month) across referrals.
    pub period_wager: f64,
    /// Hex SHA-256 of the raw upstream body this snapshot was parsed from.
    pub raw_payload_digest: String,
    pub fetched_at: SystemTime,
    pub source_status: SourceStatus,
}

impl WagerSnapshot {
    /// Tombstone recorded in the negative cache for an unknown identity.
    pub(crate) fn not_found(affiliate_id: &str) -> Self {
        Self {
            affiliate_id: affiliate_id.to_string(),
            total_wager: 0.0,
            period_wager: 0.0,
            raw_payload_digest: String::new(),
            fetched_at: SystemTime::now(),
            source_status: SourceStatus::NotFound,
        }
    }
}

// ===== Upstream payload =====
//
// Shape of the referral-leaderboard endpoint. Only `success` and the
// wagered buckets are contractual; everything else the upstream sends is
// tolerated and ignored, and missing buckets default to zero.

/// Per-referral wager buckets as reported by the upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WagerBuckets {
    #[serde(default)]
    pub today: f64,
    #[serde(default)]
    pub this_week: f64,
    #[serde(default)]
    pub this_month: f64,
    #[serde(default)]
    pub all_time: f64,
}

/// One referred player on the affiliate's leaderboard.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferralEntry {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub wagered: WagerBuckets,
}

/// Top-level referral-leaderboard response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferralLeaderboard {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<ReferralEntry>,
}

impl ReferralLeaderboard {
    /// Sum the (all-time, current-period) wager across all referrals.
    #[must_use]
    pub fn totals(&self) -> (f64, f64) {
        self.data.iter().fold((0.0, 0.0), |(total, period), entry| {
            (
                total + entry.wagered.all_time,
                period + entry.wagered.this_month,
            )
        })
    }
}

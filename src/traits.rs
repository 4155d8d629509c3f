//! The upstream seam.
//!
//! [`WagerSource`] is the single trait between the snapshot store and the
//! outside world. The production implementation is
//! [`crate::source::HttpWagerSource`]; tests substitute scripted sources
//! through [`crate::WagerTrackerBuilder::with_source`].

use async_trait::async_trait;

use crate::error::TrackerError;
use crate::types::WagerSnapshot;

/// A source of wager snapshots for affiliate identities.
///
/// # Contract
///
/// - `fetch` must bound its own execution time (timeouts, bounded
///   retries). The snapshot store runs fetches on detached tasks and
///   relies on the source terminating on its own; it never cancels one on
///   behalf of a caller.
/// - An unknown identity is reported as
///   [`TrackerError::AffiliateNotFound`]; anything else that fails is a
///   [`TrackerError::Transient`] *after* the source has exhausted its own
///   retry budget.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent caller and the background scheduler.
#[async_trait]
pub trait WagerSource: Send + Sync {
    /// Fetch the current wager snapshot for one affiliate identity.
    ///
    /// # Errors
    ///
    /// [`TrackerError::AffiliateNotFound`] for an unknown identity,
    /// [`TrackerError::Transient`] after retry exhaustion.
    async fn fetch(&self, affiliate_id: &str) -> Result<WagerSnapshot, TrackerError>;

    /// Name of this source, for logging.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

//! Error taxonomy for the wager tracker.
//!
//! The variants mirror the failure classes a platform adapter has to
//! distinguish: terminal-but-user-correctable (`AffiliateNotFound`),
//! internally-retried-then-surfaced (`Transient`), registration state
//! (`NotRegistered` / `AlreadyRegistered`), and fatal startup problems
//! (`Configuration`).

use thiserror::Error;

use crate::types::Platform;

/// All errors surfaced by the tracker's public interface.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The upstream does not know this affiliate identity.
    ///
    /// Terminal: the user must re-enter a valid id. Never retried, and the
    /// negative result is cached so repeated lookups do not hammer the
    /// upstream.
    #[error("affiliate '{affiliate_id}' not found upstream")]
    AffiliateNotFound { affiliate_id: String },

    /// The upstream could not be reached or answered abnormally, and the
    /// retry budget is exhausted.
    ///
    /// Callers only ever see this after internal retries, and even then the
    /// snapshot store may mask it by serving a stale snapshot instead.
    #[error("upstream fetch failed after {attempts} attempt(s): {reason}")]
    Transient { attempts: u32, reason: String },

    /// No registration exists for this (platform, user) pair.
    #[error("{platform} user '{platform_user_id}' is not registered")]
    NotRegistered {
        platform: Platform,
        platform_user_id: String,
    },

    /// The (platform, user) pair is already bound to a different affiliate.
    ///
    /// Informational to the end user; re-registering the *same* affiliate is
    /// a no-op success and does not produce this error.
    #[error("already registered to affiliate '{existing}'")]
    AlreadyRegistered { existing: String },

    /// Missing or invalid startup configuration. Fatal at process start,
    /// never recoverable at runtime.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TrackerError {
    /// Whether the error class is worth retrying at all.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub(crate) fn transient(attempts: u32, reason: impl Into<String>) -> Self {
        Self::Transient {
            attempts,
            reason: reason.into(),
        }
    }
}

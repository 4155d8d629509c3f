//! Retry policy for the upstream client.
//!
//! Retries are an explicit policy object rather than inlined control flow:
//! the client owns one [`RetryPolicy`] and asks it whether a failure class
//! is worth another attempt and how long to back off.

use rand::Rng;
use std::time::Duration;

use crate::config::TrackerConfig;

/// Classification of a single failed upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 404 or a well-formed "not found" body. Terminal for the identity.
    NotFound,
    /// 401/403. The identity may be fine; the credentials are not.
    /// Retrying with the same credentials cannot help.
    Denied,
    /// Connection-level failure (DNS, refused, reset).
    Network,
    /// The request exceeded its timeout.
    Timeout,
    /// 5xx or another unexpected status.
    Http,
    /// 2xx with a body that did not parse as the expected payload.
    Malformed,
}

impl FailureClass {
    /// Whether another attempt can plausibly produce a different outcome.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        match self {
            Self::NotFound | Self::Denied => false,
            Self::Network | Self::Timeout | Self::Http | Self::Malformed => true,
        }
    }
}

/// A single failed attempt: class plus a human-readable reason for logs
/// and the eventual `Transient` error.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub class: FailureClass,
    pub reason: String,
}

impl FetchFailure {
    pub fn new(class: FailureClass, reason: impl Into<String>) -> Self {
        Self {
            class,
            reason: reason.into(),
        }
    }
}

/// Bounded exponential backoff with full jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap,
        }
    }

    #[must_use]
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_base, config.backoff_cap)
    }

    /// Total attempt budget, first try included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (zero-based) should be followed by
    /// another one after `failure`.
    #[must_use]
    pub fn should_retry(&self, failure: &FetchFailure, attempt: u32) -> bool {
        failure.class.is_retryable() && attempt + 1 < self.max_attempts
    }

    /// Backoff before retry number `attempt + 1`: a uniformly random delay
    /// in `[0, min(cap, base * 2^attempt)]` (full jitter).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap);
        if exp.is_zero() {
            return Duration::ZERO;
        }
        let millis = u64::try_from(exp.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

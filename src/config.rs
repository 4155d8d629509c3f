//! Tracker configuration.
//!
//! Every tuning knob of the engine lives here: upstream endpoint and
//! credentials, request timeout and retry budget, cache TTLs, and the
//! background refresh pacing. Configuration is validated once at startup;
//! an invalid configuration is fatal and never recoverable at runtime.

use std::time::Duration;
use url::Url;

use crate::error::TrackerError;

/// Configuration for a [`crate::WagerTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL of the upstream statistics API.
    pub base_url: String,
    /// Optional bearer token sent as `Authorization: Bearer <key>`.
    pub api_key: Option<String>,
    /// User agent for upstream requests.
    pub user_agent: String,
    /// Per-request timeout on the upstream HTTP call.
    pub request_timeout: Duration,
    /// Maximum upstream attempts per fetch (first try included).
    pub max_attempts: u32,
    /// Base delay of the exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay.
    pub backoff_cap: Duration,
    /// Read-path TTL: a cached snapshot younger than this is served
    /// without touching the upstream.
    pub cache_ttl: Duration,
    /// TTL the background scheduler refreshes against. Kept shorter than
    /// `cache_ttl` so user reads mostly hit a warm cache.
    pub proactive_ttl: Duration,
    /// Delay between background refresh cycles.
    pub refresh_interval: Duration,
    /// How long a "not found" result is cached before the upstream is
    /// asked about that identity again.
    pub negative_ttl: Duration,
    /// Delay between launching consecutive refreshes within one cycle.
    pub stagger: Duration,
    /// Maximum concurrently outstanding refreshes within one cycle.
    pub refresh_concurrency: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let cache_ttl = Duration::from_secs(300);
        Self {
            base_url: "https://apis.goated.com".to_string(),
            api_key: None,
            user_agent: "wager-sync/0.1".to_string(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(5),
            cache_ttl,
            proactive_ttl: cache_ttl / 2,
            refresh_interval: Duration::from_secs(240),
            negative_ttl: Duration::from_secs(60),
            stagger: Duration::from_millis(100),
            refresh_concurrency: 4,
        }
    }
}

impl TrackerConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `WAGER_API_URL`, `WAGER_API_KEY`,
    /// `WAGER_REQUEST_TIMEOUT_SECS`, `WAGER_MAX_ATTEMPTS`,
    /// `WAGER_CACHE_TTL_SECS`, `WAGER_REFRESH_INTERVAL_SECS`,
    /// `WAGER_NEGATIVE_TTL_SECS`, `WAGER_STAGGER_MS`,
    /// `WAGER_REFRESH_CONCURRENCY`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Configuration`] if a variable is present but
    /// unparseable, or if the resulting configuration fails validation.
    pub fn from_env() -> Result<Self, TrackerError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("WAGER_API_URL") {
            config.base_url = url;
        }
        if let Ok(key) = std::env::var("WAGER_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Some(timeout) = env_secs("WAGER_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = timeout;
        }
        if let Some(attempts) = env_u32("WAGER_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(ttl) = env_secs("WAGER_CACHE_TTL_SECS")? {
            config.cache_ttl = ttl;
            config.proactive_ttl = ttl / 2;
        }
        if let Some(interval) = env_secs("WAGER_REFRESH_INTERVAL_SECS")? {
            config.refresh_interval = interval;
        }
        if let Some(ttl) = env_secs("WAGER_NEGATIVE_TTL_SECS")? {
            config.negative_ttl = ttl;
        }
        if let Some(ms) = env_u64("WAGER_STAGGER_MS")? {
            config.stagger = Duration::from_millis(ms);
        }
        if let Some(limit) = env_u32("WAGER_REFRESH_CONCURRENCY")? {
            config.refresh_concurrency = limit as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Configuration`] on an empty or non-HTTP
    /// base URL, a zero retry budget, zero TTLs, or zero concurrency.
    pub fn validate(&self) -> Result<(), TrackerError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            TrackerError::Configuration(format!("invalid base URL '{}': {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TrackerError::Configuration(format!(
                "base URL must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.max_attempts == 0 {
            return Err(TrackerError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(TrackerError::Configuration(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        if self.cache_ttl.is_zero() || self.negative_ttl.is_zero() {
            return Err(TrackerError::Configuration(
                "cache_ttl and negative_ttl must be non-zero".to_string(),
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(TrackerError::Configuration(
                "refresh_interval must be non-zero".to_string(),
            ));
        }
        if self.refresh_concurrency == 0 {
            return Err(TrackerError::Configuration(
                "refresh_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_u32(name: &str) -> Result<Option<u32>, TrackerError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|e| TrackerError::Configuration(format!("{name}='{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, TrackerError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| TrackerError::Configuration(format!("{name}='{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>, TrackerError> {
    Ok(env_u64(name)?.map(Duration::from_secs))
}

//! HTTP upstream client.
//!
//! One GET against the referral-leaderboard endpoint per fetch, with a
//! bounded request timeout, outcome classification, and policy-driven
//! retries. Every fetch carries a correlation id so a single logical
//! fetch can be followed across its attempts in the logs.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};
use std::time::SystemTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::retry::{FailureClass, FetchFailure, RetryPolicy};
use crate::traits::WagerSource;
use crate::types::{ReferralLeaderboard, SourceStatus, WagerSnapshot};

/// Upstream client over the affiliate referral-leaderboard endpoint.
pub struct HttpWagerSource {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpWagerSource {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Configuration`] on an invalid base URL,
    /// an API key that is not a valid header value, or an HTTP client
    /// that fails to construct.
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| TrackerError::Configuration(format!("invalid api key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| TrackerError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_config(config),
        })
    }

    fn endpoint(&self, affiliate_id: &str) -> String {
        format!(
            "{}/user/affiliate/referral-leaderboard/{affiliate_id}",
            self.base_url
        )
    }

    async fn fetch_once(
        &self,
        affiliate_id: &str,
        fetch_id: Uuid,
        attempt: u32,
    ) -> Result<WagerSnapshot, FetchFailure> {
        let url = self.endpoint(affiliate_id);
        debug!(fetch_id = %fetch_id, attempt, url = %url, "requesting upstream");

        let response = self.http.get(&url).send().await.map_err(classify_send)?;

        let status = response.status();
        if let Some(class) = classify_status(status) {
            return Err(FetchFailure::new(
                class,
                format!("upstream returned {status}"),
            ));
        }

        let body = response.bytes().await.map_err(classify_send)?;
        let digest = hex::encode(Sha256::digest(&body));

        let payload: ReferralLeaderboard = serde_json::from_slice(&body).map_err(|e| {
            FetchFailure::new(FailureClass::Malformed, format!("body did not parse: {e}"))
        })?;
        if !payload.success {
            // The upstream answers 200 with success=false for identities
            // it does not know.
            return Err(FetchFailure::new(
                FailureClass::NotFound,
                "upstream reported success=false",
            ));
        }

        let (total_wager, period_wager) = payload.totals();
        debug!(
            fetch_id = %fetch_id,
            affiliate = %affiliate_id,
            referrals = payload.data.len(),
            total_wager,
            "parsed upstream payload"
        );

        Ok(WagerSnapshot {
            affiliate_id: affiliate_id.to_string(),
            total_wager,
            period_wager,
            raw_payload_digest: digest,
            fetched_at: SystemTime::now(),
            source_status: SourceStatus::Ok,
        })
    }
}

#[async_trait]
impl WagerSource for HttpWagerSource {
    async fn fetch(&self, affiliate_id: &str) -> Result<WagerSnapshot, TrackerError> {
        if affiliate_id.is_empty() {
            return Err(TrackerError::AffiliateNotFound {
                affiliate_id: String::new(),
            });
        }

        let fetch_id = Uuid::new_v4();
        let mut attempt = 0;
        loop {
            match self.fetch_once(affiliate_id, fetch_id, attempt).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(failure) if failure.class == FailureClass::NotFound => {
                    debug!(fetch_id = %fetch_id, affiliate = %affiliate_id, "affiliate not found upstream");
                    return Err(TrackerError::AffiliateNotFound {
                        affiliate_id: affiliate_id.to_string(),
                    });
                }
                Err(failure) if self.retry.should_retry(&failure, attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        fetch_id = %fetch_id,
                        affiliate = %affiliate_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %failure.reason,
                        "upstream attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    warn!(
                        fetch_id = %fetch_id,
                        affiliate = %affiliate_id,
                        attempts = attempt + 1,
                        reason = %failure.reason,
                        "upstream fetch failed"
                    );
                    return Err(TrackerError::transient(attempt + 1, failure.reason));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn classify_send(error: reqwest::Error) -> FetchFailure {
    let class = if error.is_timeout() {
        FailureClass::Timeout
    } else {
        FailureClass::Network
    };
    FetchFailure::new(class, error.to_string())
}

/// Map a response status to a failure class; `None` means success.
fn classify_status(status: StatusCode) -> Option<FailureClass> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND {
        Some(FailureClass::NotFound)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(FailureClass::Denied)
    } else {
        // 5xx and any other unexpected status are treated as transient.
        Some(FailureClass::Http)
    }
}

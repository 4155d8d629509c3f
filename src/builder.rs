//! Tracker builder.
//!
//! Lets hosts swap the upstream source (the usual reason being tests or a
//! replay source) and override the milestone ladder, while keeping the
//! default HTTP client path a one-liner.
//!
//! # Example: custom source
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wager_sync::WagerTrackerBuilder;
//!
//! let tracker = WagerTrackerBuilder::new()
//!     .with_source(Arc::new(MyReplaySource::new()))
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::WagerTracker;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::milestones::MilestoneLadder;
use crate::source::HttpWagerSource;
use crate::traits::WagerSource;

/// Builder for [`WagerTracker`].
#[derive(Default)]
pub struct WagerTrackerBuilder {
    config: Option<TrackerConfig>,
    source: Option<Arc<dyn WagerSource>>,
    ladder: Option<MilestoneLadder>,
}

impl WagerTrackerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration instead of the defaults.
    #[must_use]
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom upstream source instead of the HTTP client.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn WagerSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a custom milestone ladder instead of the stock one.
    #[must_use]
    pub fn with_ladder(mut self, ladder: MilestoneLadder) -> Self {
        self.ladder = Some(ladder);
        self
    }

    /// Build the tracker.
    ///
    /// # Errors
    ///
    /// [`TrackerError::Configuration`] if the configuration is invalid or
    /// the HTTP client cannot be constructed.
    pub fn build(self) -> Result<WagerTracker, TrackerError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpWagerSource::new(&config)?),
        };
        let ladder = self.ladder.unwrap_or_default();
        Ok(WagerTracker::from_parts(config, source, ladder))
    }
}

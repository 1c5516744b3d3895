//! Group call configuration
//!
//! # Usage Examples
//!
//! ```rust
//! use rvoip_group_call_core::config::GroupCallConfig;
//! use std::time::Duration;
//!
//! let config = GroupCallConfig::new()
//!     .with_tick_interval(Duration::from_millis(500))
//!     .with_peek_interval(Duration::from_secs(5))
//!     .with_speaking_threshold(2000);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.speaking_threshold, 2000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GroupCallError, GroupCallResult};
use crate::recovery::RetryConfig;
use crate::types::AudioLevel;

/// Longest interval, margin or retry delay accepted. Keeps `Instant`
/// arithmetic in the owner task from overflowing.
const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for one group call session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupCallConfig {
    /// Period of the owner task's timer. Each tick runs one dispatch cycle.
    pub tick_interval: Duration,
    /// How often to peek while the session is alive
    pub peek_interval: Duration,
    /// Ask the transport for remote devices when it has been silent this long
    pub watchdog_interval: Duration,
    /// Refresh the membership proof when it expires within this margin
    pub proof_refresh_margin: Duration,
    /// Backoff policy for membership proof requests
    pub proof_retry: RetryConfig,
    /// Audio level at or above which a participant counts as speaking
    pub speaking_threshold: AudioLevel,
    /// Capacity of the resolved member cache
    pub max_member_cache_entries: usize,
}

impl Default for GroupCallConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            peek_interval: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(2),
            proof_refresh_margin: Duration::from_secs(60),
            proof_retry: RetryConfig::default(),
            speaking_threshold: 1500,
            max_member_cache_entries: 16,
        }
    }
}

impl GroupCallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_peek_interval(mut self, interval: Duration) -> Self {
        self.peek_interval = interval;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn with_proof_refresh_margin(mut self, margin: Duration) -> Self {
        self.proof_refresh_margin = margin;
        self
    }

    pub fn with_proof_retry(mut self, retry: RetryConfig) -> Self {
        self.proof_retry = retry;
        self
    }

    pub fn with_speaking_threshold(mut self, threshold: AudioLevel) -> Self {
        self.speaking_threshold = threshold;
        self
    }

    pub fn with_max_member_cache_entries(mut self, entries: usize) -> Self {
        self.max_member_cache_entries = entries;
        self
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> GroupCallResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GroupCallError::invalid_configuration("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GroupCallResult<()> {
        for (field, interval) in [
            ("tick_interval", self.tick_interval),
            ("peek_interval", self.peek_interval),
            ("watchdog_interval", self.watchdog_interval),
        ] {
            if interval.is_zero() {
                return Err(GroupCallError::invalid_configuration(field, "must be non-zero"));
            }
        }
        for (field, duration) in [
            ("tick_interval", self.tick_interval),
            ("peek_interval", self.peek_interval),
            ("watchdog_interval", self.watchdog_interval),
            ("proof_refresh_margin", self.proof_refresh_margin),
            ("proof_retry.initial_delay", self.proof_retry.initial_delay),
            ("proof_retry.max_delay", self.proof_retry.max_delay),
        ] {
            if duration > MAX_DURATION {
                return Err(GroupCallError::invalid_configuration(field, "must be at most one year"));
            }
        }

        let retry = &self.proof_retry;
        if retry.max_attempts == 0 {
            return Err(GroupCallError::invalid_configuration(
                "proof_retry.max_attempts",
                "must allow at least one attempt",
            ));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(GroupCallError::invalid_configuration(
                "proof_retry.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GroupCallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.max_member_cache_entries, 16);
    }

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let config = GroupCallConfig::new().with_tick_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(GroupCallError::InvalidConfiguration { field, .. }) if field == "tick_interval"
        ));

        let config = GroupCallConfig::new().with_proof_retry(RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_with_partial_input() {
        let config = GroupCallConfig::from_json(r#"{ "speaking_threshold": 900 }"#).unwrap();
        assert_eq!(config.speaking_threshold, 900);
        assert_eq!(config.peek_interval, GroupCallConfig::default().peek_interval);

        assert!(GroupCallConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_validation_rejects_overflowing_values() {
        let config = GroupCallConfig::new().with_proof_retry(RetryConfig {
            backoff_multiplier: f64::NAN,
            ..RetryConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(GroupCallError::InvalidConfiguration { field, .. }) if field == "proof_retry.backoff_multiplier"
        ));

        let config = GroupCallConfig::new().with_proof_retry(RetryConfig {
            backoff_multiplier: f64::INFINITY,
            ..RetryConfig::default()
        });
        assert!(config.validate().is_err());

        let config = GroupCallConfig::new().with_proof_refresh_margin(Duration::MAX);
        assert!(matches!(
            config.validate(),
            Err(GroupCallError::InvalidConfiguration { field, .. }) if field == "proof_refresh_margin"
        ));

        let json = r#"{ "proof_refresh_margin": { "secs": 18446744073709551615, "nanos": 0 } }"#;
        assert!(GroupCallConfig::from_json(json).is_err());

        let config = GroupCallConfig::new().with_proof_retry(RetryConfig {
            backoff_multiplier: 1e300,
            ..RetryConfig::default()
        });
        assert!(config.validate().is_ok());
    }
}

//! Retry and backoff policies
//!
//! One policy type drives both per-message retries and top-level reconnection.
//! The delay after the `n`th consecutive failure is
//! `initial_backoff * backoff_multiplier^n`, capped at `max_backoff`.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::debug;

/// Maximum allowed retry attempts
const MAX_RETRY_ATTEMPTS: u32 = 1000;
/// Maximum backoff to prevent excessive delays (1 hour)
const MAX_BACKOFF_MS: u64 = 3_600_000;
/// Maximum multiplier to prevent exponential explosion
const MAX_MULTIPLIER: f64 = 100.0;
/// Maximum jitter factor
const MAX_JITTER_FACTOR: f64 = 1.0;

fn validate_max_retries<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u32::deserialize(deserializer)?;
    if value > MAX_RETRY_ATTEMPTS {
        return Err(serde::de::Error::custom(format!(
            "max_retries {} exceeds maximum allowed value {}",
            value, MAX_RETRY_ATTEMPTS
        )));
    }
    Ok(value)
}

fn validate_backoff_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u64::deserialize(deserializer)?;
    if value > MAX_BACKOFF_MS {
        return Err(serde::de::Error::custom(format!(
            "backoff {}ms exceeds maximum allowed {}ms",
            value, MAX_BACKOFF_MS
        )));
    }
    Ok(value)
}

fn validate_multiplier<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(1.0..=MAX_MULTIPLIER).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "backoff_multiplier {} must be finite and between 1.0 and {}",
            value, MAX_MULTIPLIER
        )));
    }
    Ok(value)
}

fn validate_jitter<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(0.0..=MAX_JITTER_FACTOR).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "jitter_factor {} must be finite and between 0.0 and {}",
            value, MAX_JITTER_FACTOR
        )));
    }
    Ok(value)
}

/// Retry policy configuration with validated bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up
    #[serde(deserialize_with = "validate_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds
    #[serde(deserialize_with = "validate_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay in milliseconds
    #[serde(deserialize_with = "validate_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor per failure
    #[serde(deserialize_with = "validate_multiplier")]
    pub backoff_multiplier: f64,
    /// Random extra delay as a fraction of the computed delay
    #[serde(default, deserialize_with = "validate_jitter")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::message_processing()
    }
}

impl RetryPolicy {
    /// Per-message policy: 3 attempts, sleeping 2s, 4s, 8s after each failure
    pub fn message_processing() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: MAX_BACKOFF_MS,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Reconnection policy: fatal after 5 consecutive failures, base delay 5s
    pub fn reconnection() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 5_000,
            max_backoff_ms: MAX_BACKOFF_MS,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Exponential policy with custom bounds and no jitter
    pub fn exponential(max_retries: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: initial.as_millis() as u64,
            max_backoff_ms: max.as_millis() as u64,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Fixed delay between attempts
    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        let ms = backoff.as_millis() as u64;
        Self {
            max_retries,
            initial_backoff_ms: ms,
            max_backoff_ms: ms,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Add random jitter to every delay
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, MAX_JITTER_FACTOR);
        self
    }

    /// Delay to wait after `failures` consecutive failures
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let initial = self.initial_backoff_ms as f64;
        let cap = self.max_backoff_ms as f64;
        let exponent = failures.min(63) as i32;
        let multiplier = self.backoff_multiplier.powi(exponent);
        let base = if multiplier.is_finite() {
            (initial * multiplier).min(cap)
        } else {
            cap
        };

        let jitter = if self.jitter_factor > 0.0 {
            base * self.jitter_factor * rand::random::<f64>()
        } else {
            0.0
        };
        let delay = Duration::from_secs_f64((base + jitter) / 1000.0);

        debug!(failures, ?delay, "calculated backoff");
        delay
    }

    /// Whether another attempt is allowed after `attempts` failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Validate invariants that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("max_retries must be greater than 0".to_string());
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err("max_backoff_ms cannot be lower than initial_backoff_ms".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_backoff_doubles() {
        let policy = RetryPolicy::message_processing();

        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
        assert!(policy.backoff_for(1) < policy.backoff_for(2));
        assert!(policy.backoff_for(2) < policy.backoff_for(3));
    }

    #[test]
    fn test_reconnection_backoff() {
        let policy = RetryPolicy::reconnection();

        assert_eq!(policy.backoff_for(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(80));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy =
            RetryPolicy::exponential(50, Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.backoff_for(40), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::message_processing().with_jitter(0.5);

        for _ in 0..20 {
            let delay = policy.backoff_for(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_retry_policy_validation() {
        let valid = r#"{
            "max_retries": 5,
            "initial_backoff_ms": 1000,
            "max_backoff_ms": 30000,
            "backoff_multiplier": 2.0,
            "jitter_factor": 0.1
        }"#;
        let policy: RetryPolicy = serde_json::from_str(valid).unwrap();
        assert!(policy.validate().is_ok());

        let too_many = valid.replace("\"max_retries\": 5", "\"max_retries\": 10000");
        assert!(serde_json::from_str::<RetryPolicy>(&too_many).is_err());

        let too_long = valid.replace("\"initial_backoff_ms\": 1000", "\"initial_backoff_ms\": 7200000");
        assert!(serde_json::from_str::<RetryPolicy>(&too_long).is_err());

        let negative = valid.replace("\"backoff_multiplier\": 2.0", "\"backoff_multiplier\": -1.0");
        assert!(serde_json::from_str::<RetryPolicy>(&negative).is_err());

        let jitter = valid.replace("\"jitter_factor\": 0.1", "\"jitter_factor\": 1.5");
        assert!(serde_json::from_str::<RetryPolicy>(&jitter).is_err());

        let zero = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert!(zero.validate().is_err());
    }
}

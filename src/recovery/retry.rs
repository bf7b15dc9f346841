//! Retry configuration, delay calculation, and the shared retry loop.
//!
//! [`with_retry`] drives a caller-supplied operation, classifying every
//! failure exactly once and retrying only transient kinds listed in
//! [`RetryConfig::retryable_kinds`].

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::breaker::BreakerKey;
use crate::classify::Classifier;
use crate::config::duration_ms;
use crate::error::{ErrorKind, Failure};
use crate::{RampartError, Result, telemetry};

/// Upper bound of the random jitter, as a fraction of the delay.
const MAX_JITTER_FRACTION: f64 = 0.1;

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff with optional jitter:
///
/// ```rust
/// # use rampart::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter(false);
/// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 1s.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Whether to add up to 10% random jitter to delays. Default: true.
    pub jitter: bool,
    /// Kinds eligible for retry. Default: every kind retryable by default.
    pub retryable_kinds: BTreeSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_kinds: ErrorKind::ALL
                .into_iter()
                .filter(|k| k.is_retryable())
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Replace the set of retryable kinds.
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RampartError::configuration(
                "retry max_attempts must be at least 1",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RampartError::configuration(
                "retry backoff_multiplier must be a finite number >= 1.0",
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(RampartError::configuration(
                "retry base_delay must not exceed max_delay",
            ));
        }
        Ok(())
    }

    /// Calculate the delay after the given failed attempt (0-indexed).
    ///
    /// Uses exponential backoff: `base_delay * multiplier^attempt`, capped at
    /// `max_delay`. Does NOT include jitter — see
    /// [`effective_delay()`](Self::effective_delay) for the full calculation.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Calculate the effective delay, respecting provider `retry_after` hints.
    ///
    /// A `retry_after` duration (from a rate-limit error) takes precedence
    /// over the calculated backoff but is still capped at `max_delay`.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after
            .map(|d| d.min(self.max_delay))
            .unwrap_or_else(|| self.delay_for_attempt(attempt));
        if self.jitter {
            delay + delay.mul_f64(rand::random::<f64>() * MAX_JITTER_FRACTION)
        } else {
            delay
        }
    }

    /// Whether `err` should be retried under this configuration.
    pub fn should_retry(&self, err: &RampartError) -> bool {
        err.is_transient() && self.retryable_kinds.contains(&err.kind)
    }
}

/// Execute an async operation with retry logic.
///
/// Each failure is resolved to a typed error by `classifier`. Transient
/// errors are retried up to `config.max_attempts` with exponential backoff;
/// anything else is returned immediately. The returned error records the
/// number of attempts made in its context.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    classifier: &Classifier,
    key: &BreakerKey,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<Failure>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let failure = match f().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(breaker = %key, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e.into(),
        };
        let mut err = classifier.resolve(failure, &key.tool, &key.operation);
        err.context.attempts = attempt + 1;

        if !config.should_retry(&err) || attempt + 1 >= max_attempts {
            return Err(err);
        }

        metrics::counter!(telemetry::RETRIES_TOTAL,
            "tool" => key.tool.clone(),
            "operation" => key.operation.clone(),
        )
        .increment(1);
        let delay = config.effective_delay(attempt, err.retry_after());
        warn!(
            tool = %key.tool,
            operation = %key.operation,
            attempt = attempt + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            kind = %err.kind,
            error = %err.message,
            "retrying after transient error"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig::new()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .jitter(false);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let config = RetryConfig::new()
            .base_delay(Duration::from_millis(1000))
            .max_delay(Duration::from_secs(10));
        for _ in 0..100 {
            let delay = config.effective_delay(0, None);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn retry_after_hint_wins_but_is_capped() {
        let config = RetryConfig::new()
            .max_delay(Duration::from_secs(5))
            .jitter(false);
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            config.effective_delay(0, Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn default_retryable_kinds_follow_taxonomy() {
        let config = RetryConfig::default();
        assert!(config.retryable_kinds.contains(&ErrorKind::Network));
        assert!(config.retryable_kinds.contains(&ErrorKind::RateLimit));
        assert!(!config.retryable_kinds.contains(&ErrorKind::Authentication));
    }

    #[test]
    fn never_retried_kinds_ignore_config() {
        let config = RetryConfig::new().retryable_kinds(ErrorKind::ALL);
        let mut err = RampartError::validation("bad");
        err.retryable = true;
        assert!(!config.should_retry(&err));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        assert!(RetryConfig::new().max_attempts(0).validate().is_err());
        assert!(RetryConfig::new().validate().is_ok());
    }
}

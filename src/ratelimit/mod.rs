//! Per-identifier token-bucket rate limiting.
//!
//! A [`RateLimiter`] owns one lazily created [`TokenBucket`] per identifier.
//! Buckets refill continuously at `tokens_per_interval / interval` and hold
//! at most `burst_limit` (or `tokens_per_interval` when no burst is set)
//! tokens. Denials always surface as a typed
//! [`ErrorKind::RateLimit`](crate::ErrorKind::RateLimit) error; requests are
//! never silently dropped or queued.
//!
//! [`RateLimiterRegistry`] maps service names (e.g. `"jira"`,
//! `"github_search"`) to independently configured limiters.

pub mod registry;

pub use registry::RateLimiterRegistry;

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::config::duration_ms;
use crate::{RampartError, Result, telemetry};

/// Token-bucket parameters for one service.
///
/// ```rust
/// # use rampart::RateLimitConfig;
/// # use std::time::Duration;
/// // 30 requests per minute, at most 5 back-to-back
/// let search = RateLimitConfig::new(30, Duration::from_secs(60)).burst_limit(5);
/// assert_eq!(search.capacity(), 5.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per interval.
    pub tokens_per_interval: u32,
    /// Refill interval. Serialized as `interval_ms`.
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Bucket capacity. Defaults to `tokens_per_interval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u32>,
}

impl RateLimitConfig {
    pub fn new(tokens_per_interval: u32, interval: Duration) -> Self {
        Self {
            tokens_per_interval,
            interval,
            burst_limit: None,
        }
    }

    /// Cap the bucket at `burst` tokens.
    pub fn burst_limit(mut self, burst: u32) -> Self {
        self.burst_limit = Some(burst);
        self
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> f64 {
        f64::from(self.burst_limit.unwrap_or(self.tokens_per_interval))
    }

    /// Tokens added per millisecond.
    pub fn refill_per_ms(&self) -> f64 {
        let interval_ms = self.interval.as_secs_f64() * 1000.0;
        if interval_ms <= 0.0 {
            return 0.0;
        }
        f64::from(self.tokens_per_interval) / interval_ms
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens_per_interval == 0 {
            return Err(RampartError::configuration(
                "rate limit tokens_per_interval must be greater than 0",
            ));
        }
        if self.interval.is_zero() {
            return Err(RampartError::configuration(
                "rate limit interval must be greater than 0",
            ));
        }
        if self.burst_limit == Some(0) {
            return Err(RampartError::configuration(
                "rate limit burst_limit must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Seconds until one token is available, given `tokens` in the bucket.
    fn retry_after_secs(&self, tokens: f64) -> u64 {
        let interval_ms = self.interval.as_secs_f64() * 1000.0;
        let wait_ms = ((1.0 - tokens) / f64::from(self.tokens_per_interval)) * interval_ms;
        (wait_ms / 1000.0).ceil().max(1.0) as u64
    }
}

/// Mutable bucket state for one identifier.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_ms: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        let capacity = config.capacity();
        Self {
            tokens: capacity,
            capacity,
            refill_per_ms: config.refill_per_ms(),
            last_refill: now,
        }
    }

    /// Token count after refilling up to `now`, without mutating.
    fn projected(&self, now: Instant) -> f64 {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1000.0;
        (self.tokens + elapsed_ms * self.refill_per_ms).clamp(0.0, self.capacity)
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.projected(now);
        self.last_refill = now;
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Time since the bucket was last touched.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }
}

/// Result of a limit check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    /// Whole tokens left after this check.
    pub remaining: u32,
    /// When the bucket will be full again.
    pub reset_at: DateTime<Utc>,
    /// Seconds to wait before retrying, when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Token-bucket limiter for a single service.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Refill, then consume one token if available.
    pub fn check_limit(&self, identifier: &str) -> RateLimitStatus {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(identifier.to_owned())
            .or_insert_with(|| TokenBucket::new(&self.config, now));
        bucket.refill(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            self.status(true, bucket.tokens, None)
        } else {
            let retry_after = self.config.retry_after_secs(bucket.tokens);
            self.status(false, bucket.tokens, Some(retry_after))
        }
    }

    /// Consume a token or fail with a rate-limit error.
    pub fn acquire(&self, identifier: &str) -> Result<RateLimitStatus> {
        let status = self.check_limit(identifier);
        if status.allowed {
            return Ok(status);
        }
        let retry_after = status.retry_after_secs.unwrap_or(1);
        metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "service" => self.name.clone())
            .increment(1);
        debug!(
            service = %self.name,
            identifier,
            retry_after_secs = retry_after,
            "rate limit exceeded"
        );
        Err(RampartError::rate_limited(Duration::from_secs(retry_after))
            .with_operation(&self.name, "acquire"))
    }

    /// Current status without consuming a token or creating a bucket.
    pub fn get_status(&self, identifier: &str) -> RateLimitStatus {
        let now = Instant::now();
        let tokens = self
            .buckets
            .get(identifier)
            .map(|b| b.projected(now))
            .unwrap_or_else(|| self.config.capacity());
        if tokens >= 1.0 {
            self.status(true, tokens, None)
        } else {
            self.status(false, tokens, Some(self.config.retry_after_secs(tokens)))
        }
    }

    /// Forget the bucket for `identifier`; it restarts full.
    pub fn reset(&self, identifier: &str) -> bool {
        self.buckets.remove(identifier).is_some()
    }

    /// Forget all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Snapshot of the bucket for `identifier`, if one exists.
    pub fn bucket(&self, identifier: &str) -> Option<TokenBucket> {
        self.buckets.get(identifier).map(|b| b.clone())
    }

    /// Drop buckets untouched for longer than `idle`. Returns the number removed.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) <= idle);
        before.saturating_sub(self.buckets.len())
    }

    fn status(&self, allowed: bool, tokens: f64, retry_after_secs: Option<u64>) -> RateLimitStatus {
        let missing = (self.config.capacity() - tokens).max(0.0);
        let refill = self.config.refill_per_ms();
        let reset_ms = if refill > 0.0 { (missing / refill).ceil() } else { 0.0 };
        RateLimitStatus {
            allowed,
            remaining: tokens.floor().max(0.0) as u32,
            reset_at: Utc::now() + chrono::Duration::milliseconds(reset_ms as i64),
            retry_after_secs,
        }
    }
}

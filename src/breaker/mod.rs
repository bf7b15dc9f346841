//! Per-operation circuit breakers.
//!
//! One breaker exists per `(tool, operation)` [`BreakerKey`], created lazily
//! on the first recorded outcome. Breakers move through three states:
//!
//! - **Closed**: calls pass; failures increment `failure_count`, successes
//!   decay it by `success_decay` (floor 0). The count is also reset whenever
//!   `monitoring_period` has elapsed since the last window reset.
//! - **Open**: entered once `failure_count >= failure_threshold`; calls are
//!   rejected until `timeout` has elapsed since `opened_at`.
//! - **HalfOpen**: entered by the first call after the timeout. Calls are
//!   admitted until an outcome is recorded: a success closes the breaker
//!   (decaying the count), a failure re-opens it.
//!
//! Distinct keys never share state. Within a key, updates are applied under
//! the map shard's lock without awaiting, so concurrent outcomes for the same
//! key are last-write-wins rather than linearised with the calls they follow.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::duration_ms;
use crate::{RampartError, Result, telemetry};

/// Breaker thresholds shared by every key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within one monitoring window that open the breaker. Default: 5.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls. Default: 60s.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Window after which the failure count resets. Default: 5 minutes.
    #[serde(rename = "monitoring_period_ms", with = "duration_ms")]
    pub monitoring_period: Duration,
    /// Amount subtracted from the failure count on each success. Default: 1.
    ///
    /// A value at or above `failure_threshold` behaves like a hard reset.
    pub success_decay: u32,
    /// Closed, failure-free breakers idle this long are swept. Default: 1 hour.
    #[serde(rename = "idle_eviction_ms", with = "duration_ms")]
    pub idle_eviction: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(5 * 60),
            success_decay: 1,
            idle_eviction: Duration::from_secs(60 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period = period;
        self
    }

    pub fn success_decay(mut self, decay: u32) -> Self {
        self.success_decay = decay;
        self
    }

    pub fn idle_eviction(mut self, idle: Duration) -> Self {
        self.idle_eviction = idle;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(RampartError::configuration(
                "circuit breaker failure_threshold must be greater than 0",
            ));
        }
        if self.monitoring_period.is_zero() {
            return Err(RampartError::configuration(
                "circuit breaker monitoring_period must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Breaker state as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Identifies one breaker: the upstream tool and the operation invoked on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BreakerKey {
    pub tool: String,
    pub operation: String,
}

impl BreakerKey {
    pub fn new(tool: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tool, self.operation)
    }
}

#[derive(Debug, Clone)]
struct BreakerState {
    failure_count: u32,
    success_count: u64,
    state: CircuitState,
    last_reset_time: Instant,
    opened_at: Option<Instant>,
    last_failure_time: Option<Instant>,
    last_activity: Instant,
}

impl BreakerState {
    fn new(now: Instant) -> Self {
        Self {
            failure_count: 0,
            success_count: 0,
            state: CircuitState::Closed,
            last_reset_time: now,
            opened_at: None,
            last_failure_time: None,
            last_activity: now,
        }
    }

    fn roll_window(&mut self, now: Instant, period: Duration) {
        if now.saturating_duration_since(self.last_reset_time) > period {
            self.failure_count = 0;
            self.last_reset_time = now;
        }
    }

    fn timeout_elapsed(&self, now: Instant, timeout: Duration) -> bool {
        self.opened_at
            .is_none_or(|opened| now.saturating_duration_since(opened) > timeout)
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub key: BreakerKey,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Remaining time before an open breaker lets a call through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

/// All breakers, keyed by `(tool, operation)`.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    states: DashMap<BreakerKey, BreakerState>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call for `key` may proceed.
    ///
    /// Transitions an open breaker whose timeout has elapsed to half-open.
    pub fn allow(&self, key: &BreakerKey) -> bool {
        let Some(mut entry) = self.states.get_mut(key) else {
            return true;
        };
        let now = Instant::now();
        entry.roll_window(now, self.config.monitoring_period);
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if entry.timeout_elapsed(now, self.config.timeout) {
                    entry.state = CircuitState::HalfOpen;
                    entry.last_activity = now;
                    info!(breaker = %key, "circuit breaker half-open, allowing trial call");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call: decay the failure count, close if half-open.
    pub fn record_success(&self, key: &BreakerKey) {
        let now = Instant::now();
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(|| BreakerState::new(now));
        entry.roll_window(now, self.config.monitoring_period);
        entry.success_count += 1;
        entry.failure_count = entry.failure_count.saturating_sub(self.config.success_decay);
        entry.last_activity = now;
        if entry.state == CircuitState::HalfOpen {
            entry.state = CircuitState::Closed;
            entry.opened_at = None;
            info!(breaker = %key, failure_count = entry.failure_count, "circuit breaker closed");
        }
    }

    /// Record a failed call. Returns the resulting state.
    pub fn record_failure(&self, key: &BreakerKey) -> CircuitState {
        let now = Instant::now();
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(|| BreakerState::new(now));
        entry.roll_window(now, self.config.monitoring_period);
        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure_time = Some(now);
        entry.last_activity = now;

        let trip = match entry.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => entry.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(now);
            metrics::counter!(telemetry::CIRCUIT_OPENED_TOTAL,
                "tool" => key.tool.clone(),
                "operation" => key.operation.clone(),
            )
            .increment(1);
            warn!(
                breaker = %key,
                failure_count = entry.failure_count,
                timeout_ms = self.config.timeout.as_millis() as u64,
                "circuit breaker opened"
            );
        } else {
            debug!(breaker = %key, failure_count = entry.failure_count, "recorded failure");
        }
        entry.state
    }

    /// Current state of `key` (closed when unknown).
    pub fn state(&self, key: &BreakerKey) -> CircuitState {
        self.states
            .get(key)
            .map(|s| s.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Current failure count of `key` (0 when unknown).
    pub fn failure_count(&self, key: &BreakerKey) -> u32 {
        self.states.get(key).map(|s| s.failure_count).unwrap_or(0)
    }

    pub fn stats_for(&self, key: &BreakerKey) -> Option<CircuitBreakerStats> {
        let now = Instant::now();
        let wall = Utc::now();
        self.states
            .get(key)
            .map(|s| self.snapshot(key.clone(), &s, now, wall))
    }

    /// Snapshot of every breaker, sorted by key.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let now = Instant::now();
        let wall = Utc::now();
        let mut stats: Vec<_> = self
            .states
            .iter()
            .map(|e| self.snapshot(e.key().clone(), e.value(), now, wall))
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }

    /// Forget one breaker, or all of them when `key` is `None`.
    /// Returns the number of breakers removed.
    pub fn reset(&self, key: Option<&BreakerKey>) -> usize {
        match key {
            Some(key) => {
                let removed = usize::from(self.states.remove(key).is_some());
                info!(breaker = %key, "circuit breaker reset");
                removed
            }
            None => {
                let count = self.states.len();
                self.states.clear();
                info!(count, "all circuit breakers reset");
                count
            }
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop closed, failure-free breakers idle longer than `idle`.
    ///
    /// Breakers that are open, half-open or still carrying failures are kept,
    /// so sweeping never changes the outcome of a future call.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.states.len();
        self.states.retain(|_, s| {
            s.state != CircuitState::Closed
                || s.failure_count > 0
                || now.saturating_duration_since(s.last_activity) <= idle
        });
        before.saturating_sub(self.states.len())
    }

    /// Spawn a task sweeping idle breakers every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.sweep_idle(registry.config.idle_eviction);
                if removed > 0 {
                    info!(removed, "swept idle circuit breakers");
                }
            }
        })
    }

    fn snapshot(
        &self,
        key: BreakerKey,
        s: &BreakerState,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> CircuitBreakerStats {
        let to_wall = |at: Instant| {
            let ago = now.saturating_duration_since(at);
            wall - chrono::Duration::from_std(ago).unwrap_or_default()
        };
        let retry_in_ms = match (s.state, s.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                let elapsed = now.saturating_duration_since(opened);
                Some(self.config.timeout.saturating_sub(elapsed).as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerStats {
            key,
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            opened_at: s.opened_at.map(to_wall),
            last_failure_at: s.last_failure_time.map(to_wall),
            retry_in_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new()
                .failure_threshold(threshold)
                .timeout(Duration::from_secs(30))
                .monitoring_period(Duration::from_secs(300)),
        )
    }

    fn key() -> BreakerKey {
        BreakerKey::new("jira", "getSprint")
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold() {
        let breakers = registry(3);
        assert_eq!(breakers.record_failure(&key()), CircuitState::Closed);
        assert_eq!(breakers.record_failure(&key()), CircuitState::Closed);
        assert_eq!(breakers.record_failure(&key()), CircuitState::Open);
        assert!(!breakers.allow(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_timeout() {
        let breakers = registry(1);
        breakers.record_failure(&key());
        assert!(!breakers.allow(&key()));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breakers.allow(&key()));
        assert_eq!(breakers.state(&key()), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_until_an_outcome_is_recorded() {
        let breakers = registry(1);
        breakers.record_failure(&key());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breakers.allow(&key()));
        assert!(breakers.allow(&key()));
        assert_eq!(breakers.state(&key()), CircuitState::HalfOpen);

        breakers.record_success(&key());
        assert_eq!(breakers.state(&key()), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breakers = registry(3);
        for _ in 0..3 {
            breakers.record_failure(&key());
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breakers.allow(&key()));
        assert_eq!(breakers.record_failure(&key()), CircuitState::Open);
        assert!(!breakers.allow(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn success_decays_by_one() {
        let breakers = registry(5);
        breakers.record_failure(&key());
        breakers.record_failure(&key());
        breakers.record_success(&key());
        assert_eq!(breakers.failure_count(&key()), 1);
        breakers.record_success(&key());
        breakers.record_success(&key());
        assert_eq!(breakers.failure_count(&key()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn decay_is_tunable() {
        let breakers = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new().failure_threshold(5).success_decay(u32::MAX),
        );
        for _ in 0..4 {
            breakers.record_failure(&key());
        }
        breakers.record_success(&key());
        assert_eq!(breakers.failure_count(&key()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn monitoring_window_resets_count() {
        let breakers = registry(3);
        breakers.record_failure(&key());
        breakers.record_failure(&key());
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(breakers.record_failure(&key()), CircuitState::Closed);
        assert_eq!(breakers.failure_count(&key()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let breakers = registry(1);
        breakers.record_failure(&key());
        assert!(breakers.allow(&BreakerKey::new("jira", "getBoards")));
        assert!(breakers.allow(&BreakerKey::new("github", "getSprint")));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_failing_and_open_breakers() {
        let breakers = registry(2);
        let healthy = BreakerKey::new("github", "getCommits");
        let flaky = BreakerKey::new("github", "getPulls");
        let open = BreakerKey::new("jira", "getIssues");
        breakers.record_success(&healthy);
        breakers.record_failure(&flaky);
        breakers.record_failure(&open);
        breakers.record_failure(&open);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(breakers.sweep_idle(Duration::from_secs(60)), 1);
        assert_eq!(breakers.len(), 2);
        assert_eq!(breakers.state(&open), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_single_and_all() {
        let breakers = registry(1);
        breakers.record_failure(&key());
        breakers.record_failure(&BreakerKey::new("github", "search"));
        assert_eq!(breakers.reset(Some(&key())), 1);
        assert!(breakers.allow(&key()));
        assert_eq!(breakers.reset(None), 1);
        assert!(breakers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_open_breakers() {
        let breakers = registry(1);
        breakers.record_failure(&key());
        let stats = breakers.stats_for(&key()).unwrap();
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.opened_at.is_some());
        assert_eq!(stats.retry_in_ms, Some(30_000));
    }
}

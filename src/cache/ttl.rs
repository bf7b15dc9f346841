//! Lifecycle-driven TTLs.
//!
//! How long a value may be cached depends on whether the underlying entity
//! can still change: a closed sprint or merged pull request is historical
//! and effectively immutable, a future sprint changes occasionally, an
//! active sprint or open pull request changes constantly.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::duration_secs;

/// Lower bound for a namespace TTL factor.
pub const MIN_FACTOR: f64 = 0.25;
/// Upper bound for a namespace TTL factor.
pub const MAX_FACTOR: f64 = 4.0;

/// Mutability class of a cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Historical, will not change (closed sprint, merged PR).
    Immutable,
    /// Planned, changes occasionally (future sprint).
    Scheduled,
    /// In progress, changes frequently (active sprint, open PR).
    Active,
}

impl Lifecycle {
    /// Map a Jira sprint state. Unknown states are treated as active.
    pub fn from_sprint_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "closed" => Lifecycle::Immutable,
            "future" => Lifecycle::Scheduled,
            _ => Lifecycle::Active,
        }
    }

    /// Map a GitHub pull request state.
    pub fn from_pr_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "merged" | "closed" => Lifecycle::Immutable,
            _ => Lifecycle::Active,
        }
    }
}

/// Base TTL for each lifecycle class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleTtls {
    /// Default: 24 hours.
    #[serde(rename = "immutable_secs", with = "duration_secs")]
    pub immutable: Duration,
    /// Default: 1 hour.
    #[serde(rename = "scheduled_secs", with = "duration_secs")]
    pub scheduled: Duration,
    /// Default: 5 minutes.
    #[serde(rename = "active_secs", with = "duration_secs")]
    pub active: Duration,
}

impl Default for LifecycleTtls {
    fn default() -> Self {
        Self {
            immutable: Duration::from_secs(24 * 60 * 60),
            scheduled: Duration::from_secs(60 * 60),
            active: Duration::from_secs(5 * 60),
        }
    }
}

impl LifecycleTtls {
    pub fn base(&self, lifecycle: Lifecycle) -> Duration {
        match lifecycle {
            Lifecycle::Immutable => self.immutable,
            Lifecycle::Scheduled => self.scheduled,
            Lifecycle::Active => self.active,
        }
    }
}

/// Computes per-request TTLs; factors are adjusted by the optimizer.
#[derive(Debug)]
pub struct TtlPolicy {
    lifecycle: LifecycleTtls,
    defaults: BTreeMap<String, Duration>,
    fallback: Duration,
    factors: DashMap<String, f64>,
}

impl TtlPolicy {
    pub fn new(
        lifecycle: LifecycleTtls,
        defaults: BTreeMap<String, Duration>,
        fallback: Duration,
    ) -> Self {
        Self {
            lifecycle,
            defaults,
            fallback,
            factors: DashMap::new(),
        }
    }

    pub fn from_config(config: &super::CacheConfig) -> Self {
        Self::new(
            config.lifecycle.clone(),
            config.default_ttls.clone(),
            config.fallback_ttl,
        )
    }

    /// TTL for an entity of `lifecycle` cached under `namespace`.
    pub fn ttl_for(&self, namespace: &str, lifecycle: Lifecycle) -> Duration {
        self.scaled(namespace, self.lifecycle.base(lifecycle))
    }

    /// Configured default TTL for `namespace`, or the fallback.
    pub fn default_for(&self, namespace: &str) -> Duration {
        let base = self.defaults.get(namespace).copied().unwrap_or(self.fallback);
        self.scaled(namespace, base)
    }

    pub fn factor(&self, namespace: &str) -> f64 {
        self.factors.get(namespace).map(|f| *f).unwrap_or(1.0)
    }

    /// Set the factor for `namespace`, clamped to
    /// [`MIN_FACTOR`]..=[`MAX_FACTOR`]. Returns the stored value.
    pub fn set_factor(&self, namespace: &str, factor: f64) -> f64 {
        let factor = if factor.is_finite() {
            factor.clamp(MIN_FACTOR, MAX_FACTOR)
        } else {
            1.0
        };
        debug!(namespace, factor, "ttl factor updated");
        self.factors.insert(namespace.to_string(), factor);
        factor
    }

    /// Multiply the current factor by `multiplier`.
    pub fn scale(&self, namespace: &str, multiplier: f64) -> f64 {
        self.set_factor(namespace, self.factor(namespace) * multiplier)
    }

    /// Non-default factors, by namespace.
    pub fn factors(&self) -> BTreeMap<String, f64> {
        self.factors
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub fn reset_factors(&self) {
        self.factors.clear();
    }

    fn scaled(&self, namespace: &str, base: Duration) -> Duration {
        base.mul_f64(self.factor(namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TtlPolicy {
        TtlPolicy::new(
            LifecycleTtls::default(),
            BTreeMap::from([("sprints".to_string(), Duration::from_secs(600))]),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn lifecycle_orders_ttls() {
        let policy = policy();
        let immutable = policy.ttl_for("sprints", Lifecycle::Immutable);
        let scheduled = policy.ttl_for("sprints", Lifecycle::Scheduled);
        let active = policy.ttl_for("sprints", Lifecycle::Active);
        assert!(immutable > scheduled);
        assert!(scheduled > active);
    }

    #[test]
    fn sprint_and_pr_states_map() {
        assert_eq!(Lifecycle::from_sprint_state("closed"), Lifecycle::Immutable);
        assert_eq!(Lifecycle::from_sprint_state("FUTURE"), Lifecycle::Scheduled);
        assert_eq!(Lifecycle::from_sprint_state("active"), Lifecycle::Active);
        assert_eq!(Lifecycle::from_pr_state("merged"), Lifecycle::Immutable);
        assert_eq!(Lifecycle::from_pr_state("open"), Lifecycle::Active);
    }

    #[test]
    fn defaults_fall_back() {
        let policy = policy();
        assert_eq!(policy.default_for("sprints"), Duration::from_secs(600));
        assert_eq!(policy.default_for("unknown"), Duration::from_secs(300));
    }

    #[test]
    fn factors_scale_and_clamp() {
        let policy = policy();
        assert_eq!(policy.scale("sprints", 2.0), 2.0);
        assert_eq!(policy.default_for("sprints"), Duration::from_secs(1200));
        assert_eq!(policy.set_factor("sprints", 100.0), MAX_FACTOR);
        assert_eq!(policy.set_factor("sprints", 0.0), MIN_FACTOR);
        assert_eq!(policy.set_factor("sprints", f64::NAN), 1.0);
        policy.reset_factors();
        assert!(policy.factors().is_empty());
    }
}

//! Advisory cache tuning.
//!
//! [`CacheOptimizer::analyze`] reads [`CacheStats`] and proposes
//! [`Recommendation`]s; [`CacheOptimizer::execute`] applies the executable
//! ones. Nothing here affects correctness: without the optimizer the cache
//! simply keeps its configured TTLs and never pre-warms.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ttl::{MAX_FACTOR, TtlPolicy};
use super::{CacheStats, TieredCache, namespace_of, pattern};
use crate::config::duration_ms;
use crate::{RampartError, Result};

/// Thresholds and schedule for the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Namespaces below this hit rate get a longer TTL. Default: 0.8.
    pub target_hit_rate: f64,
    /// Namespaces below this hit rate are considered stale. Default: 0.05.
    pub stale_hit_rate: f64,
    /// Lookups a namespace needs before it is judged. Default: 100.
    pub min_samples: u64,
    /// TTL factor multiplier applied by `RaiseTtl`. Default: 1.5.
    pub ttl_step: f64,
    /// Misses a key needs before it is pre-warmed. Default: 3.
    pub prewarm_min_misses: u64,
    /// Keys pre-warmed per run. Default: 20.
    pub max_prewarm_keys: usize,
    /// L1 fill ratio that, with evictions, suggests more capacity. Default: 0.9.
    pub capacity_pressure: f64,
    /// Schedule for [`CacheOptimizer::spawn`]. Default: 10 minutes.
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Whether scheduled runs apply recommendations. Default: false.
    pub auto_execute: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            target_hit_rate: 0.8,
            stale_hit_rate: 0.05,
            min_samples: 100,
            ttl_step: 1.5,
            prewarm_min_misses: 3,
            max_prewarm_keys: 20,
            capacity_pressure: 0.9,
            interval: Duration::from_secs(10 * 60),
            auto_execute: false,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_hit_rate(mut self, rate: f64) -> Self {
        self.target_hit_rate = rate;
        self
    }

    pub fn stale_hit_rate(mut self, rate: f64) -> Self {
        self.stale_hit_rate = rate;
        self
    }

    pub fn min_samples(mut self, n: u64) -> Self {
        self.min_samples = n;
        self
    }

    pub fn ttl_step(mut self, step: f64) -> Self {
        self.ttl_step = step;
        self
    }

    pub fn prewarm_min_misses(mut self, n: u64) -> Self {
        self.prewarm_min_misses = n;
        self
    }

    pub fn max_prewarm_keys(mut self, n: usize) -> Self {
        self.max_prewarm_keys = n;
        self
    }

    pub fn capacity_pressure(mut self, ratio: f64) -> Self {
        self.capacity_pressure = ratio;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn auto_execute(mut self, enabled: bool) -> Self {
        self.auto_execute = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.target_hit_rate)
            || !unit.contains(&self.stale_hit_rate)
            || !unit.contains(&self.capacity_pressure)
        {
            return Err(RampartError::configuration(
                "optimizer rates must be between 0.0 and 1.0",
            ));
        }
        if !self.ttl_step.is_finite() || self.ttl_step <= 1.0 {
            return Err(RampartError::configuration(
                "optimizer ttl_step must be greater than 1.0",
            ));
        }
        if self.interval.is_zero() {
            return Err(RampartError::configuration(
                "optimizer interval must be non-zero",
            ));
        }
        Ok(())
    }
}

/// How urgently a recommendation should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A proposed tuning action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recommendation {
    /// Lengthen TTLs in a namespace with a poor hit rate.
    RaiseTtl {
        namespace: String,
        hit_rate: f64,
        current_factor: f64,
        proposed_factor: f64,
    },
    /// Populate repeatedly missed keys ahead of demand.
    Prewarm { namespace: String, keys: Vec<String> },
    /// Drop a namespace that is almost never hit.
    EvictNamespace { namespace: String, hit_rate: f64 },
    /// L1 is full and evicting. Advisory: capacity is fixed at construction.
    IncreaseCapacity {
        current: u64,
        suggested: u64,
        evictions: u64,
    },
}

impl Recommendation {
    pub fn priority(&self) -> Priority {
        match self {
            Recommendation::RaiseTtl { hit_rate, .. } if *hit_rate < 0.5 => Priority::High,
            Recommendation::RaiseTtl { .. } => Priority::Medium,
            Recommendation::Prewarm { .. } => Priority::Medium,
            Recommendation::IncreaseCapacity { .. } => Priority::Medium,
            Recommendation::EvictNamespace { .. } => Priority::Low,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Recommendation::RaiseTtl { namespace, .. }
            | Recommendation::Prewarm { namespace, .. }
            | Recommendation::EvictNamespace { namespace, .. } => Some(namespace),
            Recommendation::IncreaseCapacity { .. } => None,
        }
    }

    /// Whether [`CacheOptimizer::execute`] changes anything for this action.
    pub fn is_executable(&self) -> bool {
        !matches!(self, Recommendation::IncreaseCapacity { .. })
    }
}

/// What executing a recommendation did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    TtlFactor { namespace: String, factor: f64 },
    Prewarmed { namespace: String, keys: usize },
    Evicted { namespace: String, keys: usize },
    Advisory,
}

/// Output of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub generated_at: DateTime<Utc>,
    pub stats: CacheStats,
    /// Highest priority first.
    pub recommendations: Vec<Recommendation>,
    /// Filled when the pass executed its recommendations.
    pub executed: Vec<ExecutionOutcome>,
}

/// Produces origin values for keys of one namespace, for pre-warming.
#[async_trait]
pub trait CacheWarmer: Send + Sync {
    /// Fresh value for `key`, or `None` if the key no longer exists upstream.
    async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

/// Observes a [`TieredCache`] and tunes its [`TtlPolicy`].
pub struct CacheOptimizer {
    config: OptimizerConfig,
    cache: Arc<TieredCache>,
    ttl: Arc<TtlPolicy>,
    warmers: RwLock<HashMap<String, Arc<dyn CacheWarmer>>>,
}

impl std::fmt::Debug for CacheOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut warmers: Vec<String> = self.warmers.read().keys().cloned().collect();
        warmers.sort_unstable();
        f.debug_struct("CacheOptimizer")
            .field("config", &self.config)
            .field("warmers", &warmers)
            .finish_non_exhaustive()
    }
}

impl CacheOptimizer {
    pub fn new(config: OptimizerConfig, cache: Arc<TieredCache>, ttl: Arc<TtlPolicy>) -> Self {
        Self {
            config,
            cache,
            ttl,
            warmers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Register the warmer used to pre-warm `namespace`.
    pub fn register_warmer(&self, namespace: impl Into<String>, warmer: Arc<dyn CacheWarmer>) {
        self.warmers.write().insert(namespace.into(), warmer);
    }

    fn warmer(&self, namespace: &str) -> Option<Arc<dyn CacheWarmer>> {
        self.warmers.read().get(namespace).cloned()
    }

    /// Inspect current counters and propose actions.
    pub fn analyze(&self) -> OptimizationReport {
        let stats = self.cache.stats();
        let mut recommendations = Vec::new();

        for (namespace, ns) in &stats.namespaces {
            if ns.lookups() < self.config.min_samples {
                continue;
            }
            let hit_rate = ns.hit_rate();
            if hit_rate < self.config.stale_hit_rate {
                recommendations.push(Recommendation::EvictNamespace {
                    namespace: namespace.clone(),
                    hit_rate,
                });
            } else if hit_rate < self.config.target_hit_rate {
                let current_factor = self.ttl.factor(namespace);
                if current_factor < MAX_FACTOR {
                    recommendations.push(Recommendation::RaiseTtl {
                        namespace: namespace.clone(),
                        hit_rate,
                        current_factor,
                        proposed_factor: (current_factor * self.config.ttl_step).min(MAX_FACTOR),
                    });
                }
            }
        }

        let mut prewarm: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, misses) in self.cache.hot_misses(self.config.max_prewarm_keys) {
            if misses < self.config.prewarm_min_misses {
                continue;
            }
            let namespace = namespace_of(&key);
            if self.warmer(&namespace).is_some() {
                prewarm.entry(namespace).or_default().push(key);
            }
        }
        recommendations.extend(
            prewarm
                .into_iter()
                .map(|(namespace, keys)| Recommendation::Prewarm { namespace, keys }),
        );

        let pressure = stats.entries as f64 >= self.config.capacity_pressure * stats.capacity as f64;
        if stats.evictions > 0 && pressure {
            recommendations.push(Recommendation::IncreaseCapacity {
                current: stats.capacity,
                suggested: stats.capacity.saturating_mul(2),
                evictions: stats.evictions,
            });
        }

        recommendations.sort_by_key(Recommendation::priority);
        debug!(
            count = recommendations.len(),
            hit_rate = stats.hit_rate,
            "cache analysis complete"
        );
        OptimizationReport {
            generated_at: Utc::now(),
            stats,
            recommendations,
            executed: Vec::new(),
        }
    }

    /// Apply one recommendation.
    pub async fn execute(&self, recommendation: &Recommendation) -> Result<ExecutionOutcome> {
        match recommendation {
            Recommendation::RaiseTtl {
                namespace,
                proposed_factor,
                ..
            } => {
                let factor = self.ttl.set_factor(namespace, *proposed_factor);
                // judge the new TTL on fresh samples
                self.cache.reset_namespace(namespace);
                info!(namespace = %namespace, factor, "raised cache ttl");
                Ok(ExecutionOutcome::TtlFactor {
                    namespace: namespace.clone(),
                    factor,
                })
            }
            Recommendation::Prewarm { namespace, keys } => {
                let warmer = self.warmer(namespace).ok_or_else(|| {
                    RampartError::cache(format!("no warmer registered for namespace '{namespace}'"))
                })?;
                let ttl = self.ttl.default_for(namespace);
                let mut warmed = 0;
                for key in keys {
                    match warmer.fetch(key).await {
                        Ok(Some(value)) => {
                            self.cache.set(key, value, ttl).await;
                            warmed += 1;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(key = %key, error = %e.message, "pre-warm fetch failed"),
                    }
                }
                info!(namespace = %namespace, warmed, "pre-warmed cache keys");
                Ok(ExecutionOutcome::Prewarmed {
                    namespace: namespace.clone(),
                    keys: warmed,
                })
            }
            Recommendation::EvictNamespace { namespace, .. } => {
                let removed = self.cache.invalidate_pattern(&pattern(namespace)).await;
                self.cache.reset_namespace(namespace);
                info!(namespace = %namespace, removed, "evicted stale cache namespace");
                Ok(ExecutionOutcome::Evicted {
                    namespace: namespace.clone(),
                    keys: removed,
                })
            }
            Recommendation::IncreaseCapacity {
                current, suggested, ..
            } => {
                info!(current, suggested, "l1 capacity increase recommended");
                Ok(ExecutionOutcome::Advisory)
            }
        }
    }

    /// Analyze, and apply every recommendation when `auto_execute` is set.
    /// Failed actions are logged and skipped.
    pub async fn run_once(&self, auto_execute: bool) -> OptimizationReport {
        let mut report = self.analyze();
        if auto_execute {
            for recommendation in &report.recommendations {
                match self.execute(recommendation).await {
                    Ok(outcome) => report.executed.push(outcome),
                    Err(e) => warn!(?recommendation, error = %e, "optimization skipped"),
                }
            }
        }
        report
    }

    /// Run [`run_once`](Self::run_once) every `config.interval`.
    ///
    /// Requires a tokio runtime. Abort the returned handle to stop it.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let optimizer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(optimizer.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = optimizer.run_once(optimizer.config.auto_execute).await;
                if !report.recommendations.is_empty() {
                    info!(
                        recommendations = report.recommendations.len(),
                        executed = report.executed.len(),
                        hit_rate = report.stats.hit_rate,
                        "cache optimizer run"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::CacheConfig;

    fn optimizer(config: OptimizerConfig) -> CacheOptimizer {
        let cache_config = CacheConfig::default();
        let ttl = Arc::new(TtlPolicy::from_config(&cache_config));
        CacheOptimizer::new(config, Arc::new(TieredCache::new(cache_config)), ttl)
    }

    #[test]
    fn priority_orders_recommendations() {
        let poor = Recommendation::RaiseTtl {
            namespace: "a".into(),
            hit_rate: 0.1,
            current_factor: 1.0,
            proposed_factor: 1.5,
        };
        assert_eq!(poor.priority(), Priority::High);
        assert!(Priority::High < Priority::Low);
        assert!(!Recommendation::IncreaseCapacity {
            current: 1,
            suggested: 2,
            evictions: 1
        }
        .is_executable());
    }

    #[test]
    fn recommendation_serializes_with_action_tag() {
        let rec = Recommendation::EvictNamespace {
            namespace: "health".into(),
            hit_rate: 0.0,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["action"], "evict_namespace");
        assert_eq!(json["namespace"], "health");
    }

    #[tokio::test]
    async fn quiet_cache_has_no_recommendations() {
        let optimizer = optimizer(OptimizerConfig::default());
        optimizer
            .cache
            .set("boards:1", json!(1), Duration::from_secs(60))
            .await;
        assert!(optimizer.analyze().recommendations.is_empty());
    }

    #[test]
    fn config_validation() {
        assert!(OptimizerConfig::default().validate().is_ok());
        assert!(OptimizerConfig::default().ttl_step(1.0).validate().is_err());
        assert!(OptimizerConfig::default().target_hit_rate(1.5).validate().is_err());
    }
}

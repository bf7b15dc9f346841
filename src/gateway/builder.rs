//! Builder for configuring `Rampart` instances

use std::sync::Arc;

use super::Rampart;
use crate::breaker::CircuitBreakerConfig;
use crate::cache::optimizer::OptimizerConfig;
use crate::cache::{CacheConfig, CacheOptimizer, CacheWarmer, SharedCache, TieredCache, TtlPolicy};
use crate::classify::{Classifier, Rule};
use crate::config::Config;
use crate::ratelimit::{RateLimitConfig, RateLimiterRegistry};
use crate::recovery::{ErrorRecovery, RecoveryConfig, RetryConfig};
use crate::Result;

/// Builder for [`Rampart`].
///
/// ```rust
/// # use rampart::{Rampart, RateLimitConfig, RetryConfig};
/// # use std::time::Duration;
/// let rampart = Rampart::builder()
///     .retry(RetryConfig::new().max_attempts(4))
///     .rate_limit("gitlab", RateLimitConfig::new(600, Duration::from_secs(60)))
///     .build()?;
/// assert!(rampart.rate_limiters().get("gitlab").is_some());
/// # Ok::<(), rampart::RampartError>(())
/// ```
#[derive(Default)]
pub struct RampartBuilder {
    config: Config,
    shared_cache: Option<Arc<dyn SharedCache>>,
    rules: Vec<Rule>,
    warmers: Vec<(String, Arc<dyn CacheWarmer>)>,
}

impl RampartBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration (e.g. one loaded from TOML).
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = breaker;
        self
    }

    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.config.recovery = recovery;
        self
    }

    /// Add or replace the limiter for `service`.
    pub fn rate_limit(mut self, service: impl Into<String>, limit: RateLimitConfig) -> Self {
        self.config.rate_limits.insert(service.into(), limit);
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.config.optimizer = optimizer;
        self
    }

    /// Use `l2` as the shared cache tier.
    pub fn shared_cache(mut self, l2: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(l2);
        self
    }

    /// Classification rule evaluated before the built-in table.
    /// Later calls take precedence over earlier ones.
    pub fn classifier_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Warmer used by the optimizer to pre-warm `namespace`.
    pub fn cache_warmer(mut self, namespace: impl Into<String>, warmer: Arc<dyn CacheWarmer>) -> Self {
        self.warmers.push((namespace.into(), warmer));
        self
    }

    /// Validate the configuration and build the instance.
    pub fn build(self) -> Result<Rampart> {
        let config = self.config;
        config.validate()?;

        let mut classifier = Classifier::new()?;
        for rule in self.rules {
            classifier.prepend_rule(rule);
        }

        let recovery = ErrorRecovery::new(
            config.recovery.clone(),
            config.retry.clone(),
            config.circuit_breaker.clone(),
            classifier,
        );
        let limiters = RateLimiterRegistry::from_configs(&config.rate_limits)?;

        let cache = Arc::new(match self.shared_cache {
            Some(l2) => TieredCache::with_shared(config.cache.clone(), l2),
            None => TieredCache::new(config.cache.clone()),
        });
        let ttl = Arc::new(TtlPolicy::from_config(&config.cache));
        let optimizer = Arc::new(CacheOptimizer::new(
            config.optimizer.clone(),
            Arc::clone(&cache),
            Arc::clone(&ttl),
        ));
        for (namespace, warmer) in self.warmers {
            optimizer.register_warmer(namespace, warmer);
        }

        Ok(Rampart::from_parts(
            config, recovery, limiters, cache, ttl, optimizer,
        ))
    }
}

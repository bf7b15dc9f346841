//! Process-wide resilience facade.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use super::RampartBuilder;
use crate::breaker::{BreakerKey, CircuitBreakerStats};
use crate::cache::{CacheOptimizer, CacheStats, TieredCache, TtlPolicy};
use crate::config::Config;
use crate::error::Failure;
use crate::ratelimit::RateLimitStatus;
use crate::ratelimit::RateLimiterRegistry;
use crate::recovery::{ErrorAnalyticsReport, ErrorRecovery, Outcome, RecoveryContext};
use crate::Result;

/// Rate limiting, caching and error recovery for one process.
///
/// Construct once at startup and share by reference (or `Arc`); there is
/// no global state.
#[derive(Debug)]
pub struct Rampart {
    config: Config,
    recovery: ErrorRecovery,
    limiters: Arc<RateLimiterRegistry>,
    cache: Arc<TieredCache>,
    ttl: Arc<TtlPolicy>,
    optimizer: Arc<CacheOptimizer>,
}

impl Rampart {
    /// Create a new builder.
    pub fn builder() -> RampartBuilder {
        RampartBuilder::new()
    }

    /// Build from a loaded configuration with no shared cache tier.
    pub fn from_config(config: Config) -> Result<Self> {
        RampartBuilder::new().config(config).build()
    }

    pub(super) fn from_parts(
        config: Config,
        recovery: ErrorRecovery,
        limiters: RateLimiterRegistry,
        cache: Arc<TieredCache>,
        ttl: Arc<TtlPolicy>,
        optimizer: Arc<CacheOptimizer>,
    ) -> Self {
        Self {
            config,
            recovery,
            limiters: Arc::new(limiters),
            cache,
            ttl,
            optimizer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `operation` under breaker, retry and degradation policy.
    ///
    /// See [`ErrorRecovery::execute_with_recovery`].
    pub async fn execute_with_recovery<'a, T, F, Fut, E>(
        &self,
        operation: F,
        ctx: RecoveryContext<'a, T>,
    ) -> Result<Outcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<Failure>,
    {
        self.recovery.execute_with_recovery(operation, ctx).await
    }

    /// Consume a rate-limit token for `identifier` on `service`.
    pub fn acquire(&self, service: &str, identifier: &str) -> Result<RateLimitStatus> {
        self.limiters.acquire(service, identifier)
    }

    /// Rate-limit status without consuming a token.
    pub fn rate_limit_status(&self, service: &str, identifier: &str) -> Result<RateLimitStatus> {
        self.limiters.get_status(service, identifier)
    }

    pub fn rate_limiters(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiters
    }

    pub fn recovery(&self) -> &ErrorRecovery {
        &self.recovery
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn ttl_policy(&self) -> &Arc<TtlPolicy> {
        &self.ttl
    }

    pub fn optimizer(&self) -> &Arc<CacheOptimizer> {
        &self.optimizer
    }

    pub fn error_analytics(&self) -> ErrorAnalyticsReport {
        self.recovery.error_analytics()
    }

    pub fn circuit_breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.recovery.circuit_breaker_stats()
    }

    /// Reset one breaker, or all when `key` is `None`.
    pub fn reset_circuit_breaker(&self, key: Option<&BreakerKey>) -> usize {
        self.recovery.reset_circuit_breaker(key)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start the background sweeps and the scheduled optimizer.
    ///
    /// Requires a tokio runtime. Tasks stop when the handle is dropped.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let sweep = self.config.rate_limit_sweep.clone();
        let breaker_interval = sweep.interval;
        let tasks = vec![
            self.limiters.spawn_sweeper(sweep),
            self.recovery.breakers().spawn_sweeper(breaker_interval),
            self.optimizer.spawn(),
        ];
        info!(tasks = tasks.len(), "maintenance tasks started");
        MaintenanceHandle { tasks }
    }
}

/// Background tasks started by [`Rampart::spawn_maintenance`].
/// Dropping the handle aborts them.
#[derive(Debug)]
pub struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether every task is still running.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().all(|t| !t.is_finished())
    }

    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

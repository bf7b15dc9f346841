//! Service name → limiter registry with idle-bucket sweeping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{RateLimitConfig, RateLimitStatus, RateLimiter};
use crate::config::duration_ms;
use crate::{RampartError, Result};

/// Background sweep settings for idle buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// How often the sweep runs. Default: 5 minutes.
    #[serde(rename = "interval_ms", with = "duration_ms", default = "default_sweep_interval")]
    pub interval: Duration,
    /// Buckets idle longer than this are removed. Default: 10 minutes.
    #[serde(rename = "idle_ms", with = "duration_ms", default = "default_idle")]
    pub idle: Duration,
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_idle() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
            idle: default_idle(),
        }
    }
}

/// Independently configured limiters keyed by service name.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: BTreeMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one limiter per entry of `configs`.
    pub fn from_configs(configs: &BTreeMap<String, RateLimitConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (service, config) in configs {
            registry.register(service.clone(), config.clone())?;
        }
        Ok(registry)
    }

    /// Add or replace the limiter for `service`.
    pub fn register(&mut self, service: impl Into<String>, config: RateLimitConfig) -> Result<()> {
        config.validate()?;
        let service = service.into();
        debug!(service = %service, ?config, "registering rate limiter");
        self.limiters
            .insert(service.clone(), Arc::new(RateLimiter::new(service, config)));
        Ok(())
    }

    pub fn get(&self, service: &str) -> Option<&Arc<RateLimiter>> {
        self.limiters.get(service)
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    /// Consume a token for `identifier` from the `service` limiter.
    pub fn acquire(&self, service: &str, identifier: &str) -> Result<RateLimitStatus> {
        self.limiter(service)?.acquire(identifier)
    }

    /// Non-consuming status for `identifier` on `service`.
    pub fn get_status(&self, service: &str, identifier: &str) -> Result<RateLimitStatus> {
        Ok(self.limiter(service)?.get_status(identifier))
    }

    /// Reset one identifier's bucket on `service`.
    pub fn reset(&self, service: &str, identifier: &str) -> Result<bool> {
        Ok(self.limiter(service)?.reset(identifier))
    }

    /// Reset every bucket on every service.
    pub fn clear(&self) {
        for limiter in self.limiters.values() {
            limiter.clear();
        }
    }

    /// Remove idle buckets across all services. Returns the number removed.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        self.limiters.values().map(|l| l.sweep_idle(idle)).sum()
    }

    /// Spawn a task that periodically sweeps idle buckets.
    ///
    /// Requires a tokio runtime. Abort the returned handle to stop it.
    pub fn spawn_sweeper(self: &Arc<Self>, config: SweepConfig) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.sweep_idle(config.idle);
                if removed > 0 {
                    info!(removed, "swept idle rate limit buckets");
                }
            }
        })
    }

    fn limiter(&self, service: &str) -> Result<&Arc<RateLimiter>> {
        self.limiters.get(service).ok_or_else(|| {
            RampartError::configuration(format!("no rate limiter configured for service '{service}'"))
        })
    }
}

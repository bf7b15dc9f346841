//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (e.g. `rampart check --config <path>`)
//! 2. `~/.rampart/config.toml` (user)
//! 3. `/etc/rampart/config.toml` (system)
//!
//! Every section is optional; missing sections take their defaults.
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 500
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! timeout_ms = 30000
//!
//! [rate_limits.jira]
//! tokens_per_interval = 100
//! interval_ms = 60000
//! burst_limit = 20
//!
//! [cache.default_ttl_secs]
//! sprints = 600
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitBreakerConfig;
use crate::cache::CacheConfig;
use crate::cache::optimizer::OptimizerConfig;
use crate::ratelimit::RateLimitConfig;
use crate::ratelimit::registry::SweepConfig;
use crate::recovery::{RecoveryConfig, RetryConfig};
use crate::{RampartError, Result};

/// Complete configuration for one [`Rampart`](crate::Rampart) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Limiter per upstream service.
    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    #[serde(default)]
    pub rate_limit_sweep: SweepConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            recovery: RecoveryConfig::default(),
            rate_limits: default_rate_limits(),
            rate_limit_sweep: SweepConfig::default(),
            cache: CacheConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Jira core API, GitHub core API, and the GitHub search sub-API.
pub fn default_rate_limits() -> BTreeMap<String, RateLimitConfig> {
    BTreeMap::from([
        (
            "jira".to_string(),
            RateLimitConfig::new(100, Duration::from_secs(60)).burst_limit(20),
        ),
        (
            "github".to_string(),
            RateLimitConfig::new(5000, Duration::from_secs(3600)).burst_limit(100),
        ),
        (
            "github_search".to_string(),
            RateLimitConfig::new(30, Duration::from_secs(60)).burst_limit(5),
        ),
    ])
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.rampart/config.toml`
    /// 3. `/etc/rampart/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            RampartError::configuration(format!("failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            RampartError::configuration(format!("failed to load config file {path:?}: {}", e.message))
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RampartError::configuration(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RampartError::configuration(format!("failed to serialize config: {e}")))
    }

    /// Reject values that would disable a subsystem by accident.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        for (service, limiter) in &self.rate_limits {
            limiter.validate().map_err(|e| {
                RampartError::configuration(format!("rate_limits.{service}: {}", e.message))
            })?;
        }
        if self.rate_limit_sweep.interval.is_zero() {
            return Err(RampartError::configuration(
                "rate_limit_sweep interval must be non-zero",
            ));
        }
        self.cache.validate()?;
        self.optimizer.validate()?;
        Ok(())
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(RampartError::configuration(format!(
                "config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".rampart").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/rampart/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(RampartError::configuration(
            "no config file found (tried ~/.rampart/config.toml and /etc/rampart/config.toml)",
        ))
    }
}

/// Serde adapter: `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Serde adapter: `Duration` as integer seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Serde adapter: map of `Duration`s as integer seconds.
pub mod duration_secs_map {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.collect_map(map.iter().map(|(k, v)| (k, v.as_secs())))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<String, Duration>, D::Error> {
        let raw = BTreeMap::<String, u64>::deserialize(d)?;
        Ok(raw
            .into_iter()
            .map(|(k, v)| (k, Duration::from_secs(v)))
            .collect())
    }
}

//! Rampart - resilience layer for slow, rate-limited upstream APIs
//!
//! This crate sits between an application and the services it depends on
//! (issue trackers, code hosts, ...) and provides:
//!
//! - per-service token-bucket rate limiting ([`ratelimit`]),
//! - a two-tier cache with lifecycle-aware TTLs and an optimizer ([`cache`]),
//! - circuit breakers with retry, classification and graceful degradation
//!   ([`breaker`], [`recovery`], [`classify`]).
//!
//! Everything hangs off a single [`Rampart`] instance built once at startup.
//!
//! # Example
//!
//! ```rust,no_run
//! use rampart::{OperationCategory, Rampart, RawError, RecoveryContext};
//! use rampart::cache::{Lifecycle, keys};
//!
//! #[tokio::main]
//! async fn main() -> rampart::Result<()> {
//!     let rampart = Rampart::builder().build()?;
//!
//!     let key = keys::sprint_issues(42);
//!     if rampart.cache().get(&key).await.is_none() {
//!         rampart.acquire("jira", "sprint-42")?;
//!         let outcome = rampart
//!             .execute_with_recovery(
//!                 || async { Ok::<_, RawError>(serde_json::json!({ "issues": [] })) },
//!                 RecoveryContext::new("jira", "getSprintIssues")
//!                     .category(OperationCategory::DataRetrieval)
//!                     .partial_result_tolerance(true),
//!             )
//!             .await?;
//!         if let Some(value) = outcome.into_value() {
//!             let ttl = rampart.ttl_policy().ttl_for(keys::SPRINT_ISSUES, Lifecycle::Active);
//!             rampart.cache().set(&key, value, ttl).await;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
pub mod recovery;
pub mod telemetry;

// Re-export main types at crate root
pub use error::{ErrorBody, ErrorContext, ErrorKind, Failure, RampartError, RawError, Result};
pub use gateway::{MaintenanceHandle, Rampart, RampartBuilder};

pub use breaker::{
    BreakerKey, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use cache::{CacheConfig, CacheKey, CacheStats, TieredCache};
pub use classify::{Classifier, Rule};
pub use config::Config;
pub use ratelimit::{RateLimitConfig, RateLimitStatus, RateLimiter, RateLimiterRegistry};
pub use recovery::{
    Degraded, ErrorAnalytics, ErrorAnalyticsReport, ErrorRecovery, OperationCategory, Outcome,
    RecoveryConfig, RecoveryContext, RetryConfig, with_retry,
};

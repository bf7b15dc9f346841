//! Circuit-breaker-guarded execution with retry and graceful degradation.
//!
//! [`ErrorRecovery::execute_with_recovery`] is the single entry point for
//! calling an upstream operation:
//!
//! 1. If the breaker for `(tool, operation)` is open, the caller's fallback
//!    runs (when configured and enabled); otherwise the call fails with
//!    [`ErrorKind::CircuitBreakerOpen`](crate::ErrorKind::CircuitBreakerOpen).
//! 2. The operation runs under [`with_retry`], which classifies every failure
//!    once and retries transient ones with backoff.
//! 3. Success decays the breaker's failure count.
//! 4. Failure is recorded against the breaker and in [`ErrorAnalytics`],
//!    the cleanup hook runs, and either a [`Degraded`] payload (when the
//!    context tolerates partial results) or the typed error is returned.
//!
//! Recovery is composed explicitly around plain closures:
//!
//! ```rust,no_run
//! use rampart::{ErrorRecovery, OperationCategory, RawError, RecoveryContext};
//!
//! # async fn example(recovery: &ErrorRecovery) -> rampart::Result<()> {
//! let outcome = recovery
//!     .execute_with_recovery(
//!         || async { Err::<u32, _>(RawError::http(503, "service unavailable")) },
//!         RecoveryContext::new("jira", "getSprint")
//!             .category(OperationCategory::DataRetrieval)
//!             .partial_result_tolerance(true),
//!     )
//!     .await?;
//! assert!(outcome.is_degraded());
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod retry;

pub use analytics::{ErrorAnalytics, ErrorAnalyticsReport, ErrorRecord};
pub use retry::{RetryConfig, with_retry};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::breaker::{BreakerKey, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats};
use crate::classify::Classifier;
use crate::error::Failure;
use crate::{RampartError, Result, telemetry};

/// Orchestrator switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Run the caller's fallback when a breaker is open. Default: true.
    pub enable_fallback: bool,
    /// Return degraded payloads for tolerant contexts. Default: true.
    pub enable_graceful_degradation: bool,
    /// Error records retained for analytics. Default: 100.
    pub error_history_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            enable_graceful_degradation: true,
            error_history_capacity: analytics::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl RecoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    pub fn enable_graceful_degradation(mut self, enabled: bool) -> Self {
        self.enable_graceful_degradation = enabled;
        self
    }

    pub fn error_history_capacity(mut self, capacity: usize) -> Self {
        self.error_history_capacity = capacity;
        self
    }
}

/// What kind of result an operation produces; selects the degraded shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Report,
    Metrics,
    DataRetrieval,
    #[default]
    Other,
}

impl OperationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationCategory::Report => "report",
            OperationCategory::Metrics => "metrics",
            OperationCategory::DataRetrieval => "data_retrieval",
            OperationCategory::Other => "other",
        }
    }

    /// Empty, well-formed payload matching the category's success shape.
    fn empty_payload(self) -> serde_json::Value {
        match self {
            OperationCategory::Report => json!({ "sections": [], "charts": [], "summary": null }),
            OperationCategory::Metrics => json!({ "metrics": {}, "sample_size": 0 }),
            OperationCategory::DataRetrieval => json!({ "items": [], "total": 0 }),
            OperationCategory::Other => serde_json::Value::Null,
        }
    }
}

type Fallback<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T>> + Send + 'a>;
type Cleanup<'a> = Box<dyn FnOnce() -> BoxFuture<'a, ()> + Send + 'a>;

/// Per-call recovery settings.
pub struct RecoveryContext<'a, T> {
    key: BreakerKey,
    category: OperationCategory,
    fallback: Option<Fallback<'a, T>>,
    partial_result_tolerance: bool,
    cleanup: Option<Cleanup<'a>>,
}

impl<'a, T> RecoveryContext<'a, T> {
    pub fn new(tool: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            key: BreakerKey::new(tool, operation),
            category: OperationCategory::default(),
            fallback: None,
            partial_result_tolerance: false,
            cleanup: None,
        }
    }

    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    pub fn category(mut self, category: OperationCategory) -> Self {
        self.category = category;
        self
    }

    /// Accept a degraded payload instead of an error on failure.
    pub fn partial_result_tolerance(mut self, tolerate: bool) -> Self {
        self.partial_result_tolerance = tolerate;
        self
    }

    /// Value source used while the breaker is open.
    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T>> + Send + 'a,
    {
        self.fallback = Some(Box::new(move || Box::pin(fallback())));
        self
    }

    /// Hook run once after the operation has finally failed.
    pub fn cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = ()> + Send + 'a,
    {
        self.cleanup = Some(Box::new(move || Box::pin(cleanup())));
        self
    }
}

/// Marked, well-formed payload returned in place of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degraded {
    pub category: OperationCategory,
    pub partial: bool,
    pub error: bool,
    pub code: &'static str,
    pub message: &'static str,
    pub retryable: bool,
    pub tool: String,
    pub operation: String,
    pub data: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

impl Degraded {
    fn new(category: OperationCategory, key: &BreakerKey, err: &RampartError) -> Self {
        Self {
            category,
            partial: true,
            error: true,
            code: err.code(),
            message: err.user_message(),
            retryable: err.retryable,
            tool: key.tool.clone(),
            operation: key.operation.clone(),
            data: category.empty_payload(),
            generated_at: Utc::now(),
        }
    }
}

/// Result of a recovered call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The operation itself succeeded.
    Success(T),
    /// The breaker was open and the fallback supplied the value.
    Fallback(T),
    /// The operation failed and a degraded payload was produced.
    Degraded(Degraded),
}

impl<T> Outcome<T> {
    /// The value, unless degraded.
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Success(v) | Outcome::Fallback(v) => Some(v),
            Outcome::Degraded(_) => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(v) | Outcome::Fallback(v) => Some(v),
            Outcome::Degraded(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::Fallback(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded(_))
    }

    pub fn degraded(&self) -> Option<&Degraded> {
        match self {
            Outcome::Degraded(d) => Some(d),
            _ => None,
        }
    }
}

/// Breaker, retry, classification and analytics state for one process.
#[derive(Debug)]
pub struct ErrorRecovery {
    config: RecoveryConfig,
    retry: RetryConfig,
    classifier: Classifier,
    breakers: Arc<CircuitBreakerRegistry>,
    analytics: ErrorAnalytics,
}

impl ErrorRecovery {
    pub fn new(
        config: RecoveryConfig,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
        classifier: Classifier,
    ) -> Self {
        let analytics = ErrorAnalytics::new(config.error_history_capacity);
        Self {
            config,
            retry,
            classifier,
            breakers: Arc::new(CircuitBreakerRegistry::new(breaker)),
            analytics,
        }
    }

    /// Recovery with default settings and the built-in classifier.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            RecoveryConfig::default(),
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
            Classifier::new()?,
        ))
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn analytics(&self) -> &ErrorAnalytics {
        &self.analytics
    }

    /// Run `operation` under breaker, retry and degradation policy.
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
        let RecoveryContext {
            key,
            category,
            fallback,
            partial_result_tolerance,
            cleanup,
        } = ctx;

        if !self.breakers.allow(&key) {
            metrics::counter!(telemetry::CIRCUIT_REJECTIONS_TOTAL,
                "tool" => key.tool.clone(),
                "operation" => key.operation.clone(),
            )
            .increment(1);
            return match fallback {
                Some(fallback) if self.config.enable_fallback => {
                    info!(breaker = %key, "circuit open, using fallback");
                    let value = fallback().await?;
                    self.count_request(&key, "fallback");
                    Ok(Outcome::Fallback(value))
                }
                _ => {
                    warn!(breaker = %key, "circuit open, rejecting call");
                    self.count_request(&key, "rejected");
                    Err(RampartError::circuit_open(&key.tool, &key.operation))
                }
            };
        }

        let start = Instant::now();
        let result = with_retry(&self.retry, &self.classifier, &key, operation).await;
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "tool" => key.tool.clone(),
            "operation" => key.operation.clone(),
        )
        .record(start.elapsed().as_secs_f64());

        let err = match result {
            Ok(value) => {
                self.breakers.record_success(&key);
                self.count_request(&key, "ok");
                return Ok(Outcome::Success(value));
            }
            Err(err) => err,
        };

        self.breakers.record_failure(&key);
        if let Some(cleanup) = cleanup {
            cleanup().await;
        }
        error!(
            tool = %key.tool,
            operation = %key.operation,
            kind = %err.kind,
            attempts = err.context.attempts,
            status = err.context.status,
            error = %err.message,
            "operation failed"
        );
        metrics::counter!(telemetry::ERRORS_TOTAL,
            "tool" => key.tool.clone(),
            "kind" => err.code(),
        )
        .increment(1);
        self.analytics
            .record(ErrorRecord::from_error(&key.tool, &key.operation, &err));

        if partial_result_tolerance && self.config.enable_graceful_degradation {
            metrics::counter!(telemetry::DEGRADED_TOTAL,
                "tool" => key.tool.clone(),
                "category" => category.as_str(),
            )
            .increment(1);
            self.count_request(&key, "degraded");
            return Ok(Outcome::Degraded(Degraded::new(category, &key, &err)));
        }
        self.count_request(&key, "error");
        Err(err)
    }

    pub fn error_analytics(&self) -> ErrorAnalyticsReport {
        self.analytics.report()
    }

    pub fn circuit_breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.stats()
    }

    /// Reset one breaker, or all when `key` is `None`.
    pub fn reset_circuit_breaker(&self, key: Option<&BreakerKey>) -> usize {
        self.breakers.reset(key)
    }

    fn count_request(&self, key: &BreakerKey, status: &'static str) {
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "tool" => key.tool.clone(),
            "operation" => key.operation.clone(),
            "status" => status,
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_payload_shapes() {
        assert_eq!(OperationCategory::DataRetrieval.empty_payload()["total"], 0);
        assert!(OperationCategory::Report.empty_payload()["sections"].is_array());
        assert!(OperationCategory::Metrics.empty_payload()["metrics"].is_object());
        assert!(OperationCategory::Other.empty_payload().is_null());
    }

    #[test]
    fn degraded_carries_markers() {
        let key = BreakerKey::new("jira", "getVelocity");
        let err = RampartError::new(crate::ErrorKind::Server, "boom");
        let degraded = Degraded::new(OperationCategory::Metrics, &key, &err);
        let json = serde_json::to_value(&degraded).unwrap();
        assert_eq!(json["partial"], true);
        assert_eq!(json["error"], true);
        assert_eq!(json["code"], "SERVER_ERROR");
        assert_eq!(json["category"], "metrics");
    }

    #[test]
    fn outcome_accessors() {
        let ok: Outcome<u32> = Outcome::Success(1);
        assert_eq!(ok.value(), Some(&1));
        assert!(ok.is_success());
        let fb: Outcome<u32> = Outcome::Fallback(2);
        assert!(fb.is_fallback());
        assert_eq!(fb.into_value(), Some(2));
    }
}

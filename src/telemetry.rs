//! Telemetry metric name constants.
//!
//! Centralised metric names for rampart operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `rampart_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `tool` — upstream service name (e.g. "jira", "github")
//! - `operation` — operation invoked (e.g. "getSprint")
//! - `status` — outcome: "ok", "error", "degraded" or "fallback"
//! - `tier` — cache tier: "l1" or "l2"
//! - `kind` — error kind code (e.g. "RATE_LIMIT_ERROR")

/// Total operations executed through the recovery orchestrator.
///
/// Labels: `tool`, `operation`, `status`.
pub const REQUESTS_TOTAL: &str = "rampart_requests_total";

/// Operation duration in seconds, retries included.
///
/// Labels: `tool`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "rampart_request_duration_seconds";

/// Total retry attempts (not counting the initial attempt).
///
/// Labels: `tool`, `operation`.
pub const RETRIES_TOTAL: &str = "rampart_retries_total";

/// Calls short-circuited by an open breaker.
///
/// Labels: `tool`, `operation`.
pub const CIRCUIT_REJECTIONS_TOTAL: &str = "rampart_circuit_rejections_total";

/// Breaker transitions into the open state.
///
/// Labels: `tool`, `operation`.
pub const CIRCUIT_OPENED_TOTAL: &str = "rampart_circuit_opened_total";

/// Requests denied by a rate limiter.
///
/// Labels: `service`.
pub const RATE_LIMITED_TOTAL: &str = "rampart_rate_limited_total";

/// Classified errors that surfaced after retries.
///
/// Labels: `tool`, `kind`.
pub const ERRORS_TOTAL: &str = "rampart_errors_total";

/// Degraded payloads returned instead of errors.
///
/// Labels: `tool`, `category`.
pub const DEGRADED_TOTAL: &str = "rampart_degraded_total";

/// Total cache hits.
///
/// Labels: `tier`.
pub const CACHE_HITS_TOTAL: &str = "rampart_cache_hits_total";

/// Total cache misses (both tiers missed).
pub const CACHE_MISSES_TOTAL: &str = "rampart_cache_misses_total";

/// Shared-tier failures swallowed by the cache.
pub const CACHE_ERRORS_TOTAL: &str = "rampart_cache_errors_total";

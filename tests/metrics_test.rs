//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;

use rampart::{
    CircuitBreakerConfig, Rampart, RateLimitConfig, RawError, RecoveryContext, RetryConfig,
    telemetry,
};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for `name` whose `label` equals `value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn rampart() -> Rampart {
    Rampart::builder()
        .retry(
            RetryConfig::new()
                .max_attempts(2)
                .base_delay(Duration::from_millis(1))
                .jitter(false),
        )
        .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(2))
        .rate_limit("tiny", RateLimitConfig::new(1, Duration::from_secs(60)))
        .build()
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn successful_operation_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                rampart()
                    .execute_with_recovery(
                        || async { Ok::<_, RawError>(json!({ "ok": true })) },
                        RecoveryContext::new("jira", "getBoards"),
                    )
                    .await
            })
        })
    });
    assert!(result.is_ok());

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "ok"),
        1
    );
    assert!(
        has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failures_record_retries_errors_and_breaker_trips() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let rampart = rampart();
                for _ in 0..3 {
                    let _ = rampart
                        .execute_with_recovery(
                            || async { Err::<(), _>(RawError::http(503, "service unavailable")) },
                            RecoveryContext::new("github", "listCommits"),
                        )
                        .await;
                }
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    // two failed calls, one retry each, then the breaker rejects the third
    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ERRORS_TOTAL, "kind", "SERVER_ERROR"),
        2
    );
    assert_eq!(counter_total(&snapshot, telemetry::CIRCUIT_OPENED_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CIRCUIT_REJECTIONS_TOTAL), 1);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "rejected"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn degraded_results_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let outcome = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                rampart()
                    .execute_with_recovery(
                        || async { Err::<(), _>(RawError::http(400, "bad request")) },
                        RecoveryContext::new("jira", "velocity").partial_result_tolerance(true),
                    )
                    .await
            })
        })
    });
    assert!(outcome.unwrap().is_degraded());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::DEGRADED_TOTAL), 1);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "degraded"),
        1
    );
}

#[test]
fn rate_limit_denials_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let rampart = rampart();
        assert!(rampart.acquire("tiny", "user").is_ok());
        assert!(rampart.acquire("tiny", "user").is_err());
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RATE_LIMITED_TOTAL, "service", "tiny"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_hits_and_misses_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let rampart = rampart();
                let cache = rampart.cache();
                cache.get("boards:1").await;
                cache.set("boards:1", json!(1), Duration::from_secs(60)).await;
                cache.get("boards:1").await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_HITS_TOTAL, "tier", "l1"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let outcome = rampart()
        .execute_with_recovery(
            || async { Ok::<_, RawError>(1) },
            RecoveryContext::new("jira", "ping"),
        )
        .await
        .unwrap();
    assert!(outcome.is_success());
}

//! Tests for per-key circuit breaker state.

use std::sync::Arc;
use std::time::Duration;

use rampart::{BreakerKey, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};

fn registry(config: CircuitBreakerConfig) -> CircuitBreakerRegistry {
    CircuitBreakerRegistry::new(config)
}

fn key() -> BreakerKey {
    BreakerKey::new("github", "listPullRequests")
}

#[tokio::test(start_paused = true)]
async fn success_decays_failure_count_gradually() {
    let breakers = registry(CircuitBreakerConfig::new().failure_threshold(5));
    for _ in 0..4 {
        breakers.record_failure(&key());
    }
    breakers.record_success(&key());
    assert_eq!(breakers.failure_count(&key()), 3);
    for _ in 0..10 {
        breakers.record_success(&key());
    }
    assert_eq!(breakers.failure_count(&key()), 0);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_reports_remaining_timeout() {
    let breakers = registry(
        CircuitBreakerConfig::new()
            .failure_threshold(1)
            .timeout(Duration::from_secs(60)),
    );
    assert_eq!(breakers.record_failure(&key()), CircuitState::Open);
    assert!(!breakers.allow(&key()));

    tokio::time::advance(Duration::from_secs(20)).await;
    let stats = breakers.stats_for(&key()).unwrap();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.retry_in_ms, Some(40_000));
    assert!(stats.opened_at.is_some());

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["state"], "open");
    assert_eq!(json["key"]["tool"], "github");
}

#[tokio::test(start_paused = true)]
async fn half_open_is_reported_after_timeout() {
    let breakers = registry(
        CircuitBreakerConfig::new()
            .failure_threshold(1)
            .timeout(Duration::from_secs(5)),
    );
    breakers.record_failure(&key());
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(breakers.allow(&key()));
    assert_eq!(breakers.state(&key()), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn idle_sweep_keeps_breakers_that_matter() {
    let breakers = Arc::new(registry(CircuitBreakerConfig::new().failure_threshold(2)));
    let healthy = BreakerKey::new("jira", "healthy");
    let flaky = BreakerKey::new("jira", "flaky");
    let open = BreakerKey::new("jira", "down");

    breakers.record_success(&healthy);
    breakers.record_failure(&flaky);
    breakers.record_failure(&open);
    breakers.record_failure(&open);

    tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
    assert_eq!(breakers.sweep_idle(Duration::from_secs(60 * 60)), 1);
    assert_eq!(breakers.len(), 2);
    assert!(breakers.stats_for(&healthy).is_none());
    assert!(breakers.stats_for(&open).is_some());
}

#[tokio::test(start_paused = true)]
async fn sweeper_task_runs_on_schedule() {
    let breakers = Arc::new(registry(
        CircuitBreakerConfig::new().idle_eviction(Duration::from_secs(60)),
    ));
    breakers.record_success(&key());

    let handle = breakers.spawn_sweeper(Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(breakers.is_empty());
    handle.abort();
}

#[test]
fn stats_are_sorted_by_key() {
    let breakers = registry(CircuitBreakerConfig::default());
    breakers.record_success(&BreakerKey::new("jira", "b"));
    breakers.record_success(&BreakerKey::new("github", "z"));
    breakers.record_success(&BreakerKey::new("jira", "a"));

    let keys: Vec<String> = breakers.stats().iter().map(|s| s.key.to_string()).collect();
    assert_eq!(keys, vec!["github:z", "jira:a", "jira:b"]);
}

#[test]
fn config_rejects_zero_threshold() {
    assert!(CircuitBreakerConfig::new().failure_threshold(0).validate().is_err());
}

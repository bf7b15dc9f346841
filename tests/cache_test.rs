//! Tests for [`TieredCache`] — local L1 in front of a shared L2.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use rampart::cache::{
    CacheConfig, CacheEntry, CacheKey, Lifecycle, MemorySharedCache, SharedCache, TieredCache,
    TtlPolicy, keys, pattern,
};
use rampart::{RampartError, Result};

// ============================================================================
// Shared-tier doubles
// ============================================================================

#[derive(Debug)]
struct UnreachableShared;

#[async_trait]
impl SharedCache for UnreachableShared {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
        Err(RampartError::cache("connection refused"))
    }

    async fn set(&self, _entry: &CacheEntry) -> Result<()> {
        Err(RampartError::cache("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(RampartError::cache("connection refused"))
    }

    async fn scan(&self, _pattern: &str) -> Result<Vec<String>> {
        Err(RampartError::cache("connection refused"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sprint {
    id: u64,
    state: String,
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

// ============================================================================
// Basic operations
// ============================================================================

#[tokio::test]
async fn set_then_get_within_ttl() {
    let cache = TieredCache::new(CacheConfig::default());
    let key = keys::sprint(7);
    cache.set(&key, json!({"id": 7}), secs(60)).await;
    assert_eq!(cache.get(&key).await, Some(json!({"id": 7})));
}

#[tokio::test]
async fn entry_expires_after_ttl() {
    let cache = TieredCache::new(CacheConfig::default());
    cache
        .set("health:jira", json!("ok"), Duration::from_millis(50))
        .await;
    assert!(cache.get("health:jira").await.is_some());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.get("health:jira").await.is_none());
}

#[tokio::test]
async fn delete_removes_entry() {
    let cache = TieredCache::new(CacheConfig::default());
    cache.set("boards:1", json!(1), secs(60)).await;
    assert!(cache.delete("boards:1").await);
    assert!(!cache.delete("boards:1").await);
    assert!(cache.get("boards:1").await.is_none());
    assert_eq!(cache.stats().deletes, 1);
}

#[tokio::test]
async fn zero_ttl_set_expires_previous_value() {
    let shared = Arc::new(MemorySharedCache::new());
    let cache = TieredCache::with_shared(CacheConfig::default(), shared.clone());
    cache.set("sprints:1", json!("old"), secs(60)).await;
    assert_eq!(shared.len(), 1);

    cache.set("sprints:1", json!("new"), Duration::ZERO).await;
    assert!(cache.get("sprints:1").await.is_none());
    assert_eq!(shared.len(), 0);
}

#[tokio::test]
async fn typed_round_trip() {
    let cache = TieredCache::new(CacheConfig::default());
    let sprint = Sprint {
        id: 3,
        state: "active".into(),
    };
    cache
        .set_json(&keys::sprint(3), &sprint, secs(60))
        .await
        .unwrap();
    let got: Option<Sprint> = cache.get_json(&keys::sprint(3)).await;
    assert_eq!(got, Some(sprint));

    // wrong shape counts as an error, not a panic
    let wrong: Option<Vec<u8>> = cache.get_json(&keys::sprint(3)).await;
    assert!(wrong.is_none());
    assert_eq!(cache.stats().errors, 1);
}

#[tokio::test]
async fn get_or_fetch_calls_origin_once() {
    let cache = TieredCache::new(CacheConfig::default());
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Vec<u32> = cache
            .get_or_fetch("velocity:9:3", secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![21, 34, 13])
            })
            .await
            .unwrap();
        assert_eq!(value, vec![21, 34, 13]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn get_or_fetch_does_not_cache_errors() {
    let cache = TieredCache::new(CacheConfig::default());
    let result: Result<u32> = cache
        .get_or_fetch("velocity:1:3", secs(60), || async {
            Err(RampartError::validation("board not found"))
        })
        .await;
    assert!(result.is_err());
    assert!(cache.get("velocity:1:3").await.is_none());
}

// ============================================================================
// Keys and patterns
// ============================================================================

#[test]
fn distinct_params_never_collide() {
    let candidates = [
        CacheKey::new("commits").param("a:b").param("c").build(),
        CacheKey::new("commits").param("a").param("b:c").build(),
        CacheKey::new("commits").param("a").param("b").param("c").build(),
        CacheKey::new("commits").param("a%3Ab").param("c").build(),
        CacheKey::new("commits:a").param("b").param("c").build(),
    ];
    let unique: HashSet<_> = candidates.iter().collect();
    assert_eq!(unique.len(), candidates.len());
}

#[test]
fn key_is_deterministic() {
    assert_eq!(
        keys::commits("rust-lang", "rust", Some("2024-01-01"), None),
        keys::commits("rust-lang", "rust", Some("2024-01-01"), None),
    );
}

#[tokio::test]
async fn invalidate_pattern_scopes_to_namespace() {
    let cache = TieredCache::new(CacheConfig::default());
    cache.set(&keys::sprint(1), json!(1), secs(60)).await;
    cache.set(&keys::sprint(2), json!(2), secs(60)).await;
    cache.set(&keys::sprint_issues(1), json!([]), secs(60)).await;

    let removed = cache.invalidate_pattern(&pattern(keys::SPRINTS)).await;
    assert_eq!(removed, 2);
    assert!(cache.get(&keys::sprint_issues(1)).await.is_some());
    assert!(cache.scan(&pattern(keys::SPRINTS)).await.is_empty());
}

// ============================================================================
// Shared tier
// ============================================================================

#[tokio::test]
async fn shared_tier_backfills_other_instances() {
    let shared = Arc::new(MemorySharedCache::new());
    let writer = TieredCache::with_shared(CacheConfig::default(), shared.clone());
    let reader = TieredCache::with_shared(CacheConfig::default(), shared.clone());

    writer.set("boards:5", json!({"name": "core"}), secs(60)).await;
    assert_eq!(shared.len(), 1);

    assert_eq!(reader.get("boards:5").await, Some(json!({"name": "core"})));
    assert_eq!(reader.get("boards:5").await, Some(json!({"name": "core"})));

    let stats = reader.stats();
    assert_eq!(stats.l2_hits, 1);
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.l2_backend.as_deref(), Some("memory"));
}

#[tokio::test]
async fn delete_reaches_shared_tier() {
    let shared = Arc::new(MemorySharedCache::new());
    let a = TieredCache::with_shared(CacheConfig::default(), shared.clone());
    let b = TieredCache::with_shared(CacheConfig::default(), shared.clone());

    a.set("boards:6", json!(6), secs(60)).await;
    assert!(b.delete("boards:6").await);
    assert!(shared.is_empty());
}

#[tokio::test]
async fn unreachable_shared_tier_degrades_to_local() {
    let cache = TieredCache::with_shared(CacheConfig::default(), Arc::new(UnreachableShared));

    cache.set("boards:1", json!(1), secs(60)).await;
    assert_eq!(cache.get("boards:1").await, Some(json!(1)));
    assert!(cache.get("boards:2").await.is_none());
    assert_eq!(cache.scan(&pattern(keys::BOARDS)).await, vec!["boards:1"]);

    let stats = cache.stats();
    assert!(stats.errors >= 3, "expected set/get/scan failures, got {}", stats.errors);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

// ============================================================================
// Stats and TTL policy
// ============================================================================

#[tokio::test]
async fn stats_track_namespaces_and_hot_misses() {
    let cache = TieredCache::new(CacheConfig::default());
    for _ in 0..4 {
        cache.get(&keys::sprint_issues(11)).await;
    }
    cache.get(&keys::board(1)).await;
    cache.set(&keys::board(1), json!(1), secs(60)).await;
    cache.get(&keys::board(1)).await;

    let stats = cache.stats();
    assert_eq!(stats.misses, 5);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.namespaces[keys::SPRINT_ISSUES].misses, 4);
    assert_eq!(stats.namespaces[keys::BOARDS].hit_rate(), 0.5);

    // setting a key clears its miss history
    assert_eq!(cache.hot_misses(10), vec![(keys::sprint_issues(11), 4)]);

    cache.reset_stats();
    assert_eq!(cache.stats().hits, 0);
    assert!(cache.get(&keys::board(1)).await.is_some());
}

#[test]
fn lifecycle_drives_ttl() {
    let policy = TtlPolicy::from_config(&CacheConfig::default());
    let closed = policy.ttl_for(keys::SPRINTS, Lifecycle::from_sprint_state("closed"));
    let future = policy.ttl_for(keys::SPRINTS, Lifecycle::from_sprint_state("future"));
    let active = policy.ttl_for(keys::SPRINTS, Lifecycle::from_sprint_state("active"));
    assert!(closed > future);
    assert!(future > active);

    assert_eq!(
        policy.ttl_for(keys::PULL_REQUESTS, Lifecycle::from_pr_state("merged")),
        closed
    );
}

#[test]
fn ttl_factor_is_clamped() {
    let policy = TtlPolicy::from_config(&CacheConfig::default());
    let base = policy.default_for(keys::HEALTH);
    assert_eq!(policy.set_factor(keys::HEALTH, 100.0), 4.0);
    assert_eq!(policy.default_for(keys::HEALTH), base * 4);
    assert_eq!(policy.set_factor(keys::HEALTH, 0.0), 0.25);
}

#[test]
fn config_rejects_zero_capacity() {
    assert!(CacheConfig::new().l1_max_entries(0).validate().is_err());
    assert!(CacheConfig::new().validate().is_ok());
}

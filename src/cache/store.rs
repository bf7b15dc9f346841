//! Two-tier cache store.
//!
//! # Read path
//!
//! 1. L1 hit → return.
//! 2. L1 miss, L2 hit → backfill L1 with the entry's remaining TTL, return.
//! 3. Double miss → `None`; the caller fetches from origin and calls
//!    [`TieredCache::set`], which writes both tiers.
//!
//! L1 is a bounded moka cache with per-entry expiry. L2 is optional; every
//! L2 error is logged, counted in [`CacheStats::errors`] and otherwise
//! ignored, so a missing or failing shared tier only costs latency.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ttl::LifecycleTtls;
use super::{CacheEntry, SharedCache, keys, matches_pattern, namespace_of};
use crate::config::{duration_secs, duration_secs_map};
use crate::{RampartError, Result, telemetry};

/// Configuration for the tiered cache.
///
/// ```rust
/// # use rampart::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .l1_max_entries(50_000)
///     .default_ttl("health", Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of L1 entries. Default: 10,000.
    pub l1_max_entries: u64,
    /// Default TTL per namespace, used when the caller has no lifecycle.
    #[serde(rename = "default_ttl_secs", with = "duration_secs_map")]
    pub default_ttls: BTreeMap<String, Duration>,
    /// TTL for namespaces without a configured default. Default: 5 minutes.
    #[serde(rename = "fallback_ttl_secs", with = "duration_secs")]
    pub fallback_ttl: Duration,
    pub lifecycle: LifecycleTtls,
    /// Distinct missed keys tracked for pre-warming. Default: 1,024.
    pub hot_miss_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let secs = |s| Duration::from_secs(s);
        Self {
            l1_max_entries: 10_000,
            default_ttls: BTreeMap::from([
                (keys::BOARDS.to_string(), secs(60 * 60)),
                (keys::SPRINTS.to_string(), secs(15 * 60)),
                (keys::SPRINT_ISSUES.to_string(), secs(5 * 60)),
                (keys::VELOCITY.to_string(), secs(30 * 60)),
                (keys::COMMITS.to_string(), secs(10 * 60)),
                (keys::PULL_REQUESTS.to_string(), secs(5 * 60)),
                (keys::ANALYTICS.to_string(), secs(30 * 60)),
                (keys::HEALTH.to_string(), secs(60)),
                (keys::CIRCUIT_BREAKER.to_string(), secs(60)),
            ]),
            fallback_ttl: secs(5 * 60),
            lifecycle: LifecycleTtls::default(),
            hot_miss_capacity: 1_024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn l1_max_entries(mut self, n: u64) -> Self {
        self.l1_max_entries = n;
        self
    }

    pub fn default_ttl(mut self, namespace: impl Into<String>, ttl: Duration) -> Self {
        self.default_ttls.insert(namespace.into(), ttl);
        self
    }

    pub fn fallback_ttl(mut self, ttl: Duration) -> Self {
        self.fallback_ttl = ttl;
        self
    }

    pub fn lifecycle(mut self, lifecycle: LifecycleTtls) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn hot_miss_capacity(mut self, n: usize) -> Self {
        self.hot_miss_capacity = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.l1_max_entries == 0 {
            return Err(RampartError::configuration(
                "cache l1_max_entries must be greater than 0",
            ));
        }
        if self.fallback_ttl.is_zero() {
            return Err(RampartError::configuration(
                "cache fallback_ttl_secs must be greater than 0",
            ));
        }
        if let Some((ns, _)) = self.default_ttls.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(RampartError::configuration(format!(
                "cache default_ttl_secs.{ns} must be greater than 0"
            )));
        }
        Ok(())
    }
}

/// Lookup counters for one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
}

impl NamespaceStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hits over lookups; 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.lookups())
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Shared-tier failures and undecodable values.
    pub errors: u64,
    /// L1 entries dropped to stay within capacity.
    pub evictions: u64,
    pub expirations: u64,
    /// L1 key count.
    pub entries: u64,
    pub capacity: u64,
    /// Estimated L1 footprint.
    pub size_bytes: u64,
    pub hit_rate: f64,
    pub l2_backend: Option<String>,
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

impl CacheStats {
    pub fn l2_enabled(&self) -> bool {
        self.l2_backend.is_some()
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for c in [
            &self.hits,
            &self.misses,
            &self.l1_hits,
            &self.l2_hits,
            &self.sets,
            &self.deletes,
            &self.errors,
            &self.evictions,
            &self.expirations,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Per-entry expiry for L1, taken from the entry's own TTL.
struct EntryExpiry;

impl moka::Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining_ttl())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining_ttl())
    }
}

/// Local L1 in front of an optional shared L2.
pub struct TieredCache {
    config: CacheConfig,
    l1: Cache<String, Arc<CacheEntry>>,
    l2: Option<Arc<dyn SharedCache>>,
    counters: Arc<Counters>,
    namespaces: DashMap<String, NamespaceStats>,
    hot_misses: DashMap<String, u64>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.config)
            .field("l1_entries", &self.l1.entry_count())
            .field("l2", &self.l2.as_ref().map(|l2| l2.name().to_string()))
            .finish()
    }
}

impl TieredCache {
    /// L1-only cache.
    pub fn new(config: CacheConfig) -> Self {
        let counters = Arc::new(Counters::default());
        let listener = Arc::clone(&counters);
        let l1 = Cache::builder()
            .max_capacity(config.l1_max_entries)
            .expire_after(EntryExpiry)
            .eviction_listener(move |_key, _value, cause| match cause {
                RemovalCause::Size => {
                    listener.evictions.fetch_add(1, Ordering::Relaxed);
                }
                RemovalCause::Expired => {
                    listener.expirations.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            })
            .build();
        Self {
            config,
            l1,
            l2: None,
            counters,
            namespaces: DashMap::new(),
            hot_misses: DashMap::new(),
        }
    }

    /// Cache with a shared tier.
    pub fn with_shared(config: CacheConfig, l2: Arc<dyn SharedCache>) -> Self {
        let mut cache = Self::new(config);
        cache.l2 = Some(l2);
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_shared_tier(&self) -> bool {
        self.l2.is_some()
    }

    /// Value stored under `key`, if any tier has it.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.get_entry(key).await.map(|e| e.value.clone())
    }

    pub async fn get_entry(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let namespace = namespace_of(key);

        if let Some(entry) = self.l1.get(key) {
            self.record_hit(&namespace, "l1");
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }

        if let Some(l2) = &self.l2 {
            match l2.get(key).await {
                Ok(Some(entry)) if !entry.is_expired() => {
                    let entry = Arc::new(entry);
                    self.l1.insert(key.to_string(), Arc::clone(&entry));
                    self.record_hit(&namespace, "l2");
                    self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, backend = l2.name(), "l1 backfilled from shared tier");
                    return Some(entry);
                }
                Ok(_) => {}
                Err(e) => self.record_l2_error(l2.as_ref(), "get", &e),
            }
        }

        self.record_miss(&namespace, key);
        None
    }

    /// Store `value` in both tiers for `ttl`. A zero TTL expires any
    /// existing entry instead.
    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if ttl.is_zero() {
            self.delete(key).await;
            return;
        }
        let entry = Arc::new(CacheEntry::new(key, value, ttl));
        self.l1.insert(key.to_string(), Arc::clone(&entry));
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.namespaces
            .entry(namespace_of(key))
            .or_default()
            .sets += 1;
        self.hot_misses.remove(key);

        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.set(&entry).await {
                self.record_l2_error(l2.as_ref(), "set", &e);
            }
        }
    }

    /// Remove `key` from both tiers. Returns whether any tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = self.l1.remove(key).is_some();
        if let Some(l2) = &self.l2 {
            match l2.delete(key).await {
                Ok(r) => removed |= r,
                Err(e) => self.record_l2_error(l2.as_ref(), "delete", &e),
            }
        }
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Live keys matching a prefix pattern (`namespace:*`), across tiers.
    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .l1
            .iter()
            .filter(|(k, v)| matches_pattern(k, pattern) && !v.is_expired())
            .map(|(k, _)| String::clone(&k))
            .collect();
        if let Some(l2) = &self.l2 {
            match l2.scan(pattern).await {
                Ok(remote) => keys.extend(remote),
                Err(e) => self.record_l2_error(l2.as_ref(), "scan", &e),
            }
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Delete every key matching `pattern`. Returns the number removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let keys = self.scan(pattern).await;
        let mut removed = 0;
        for key in &keys {
            if self.delete(key).await {
                removed += 1;
            }
        }
        debug!(pattern, removed, "invalidated cache keys");
        removed
    }

    /// Typed read. Undecodable values count as an error and a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Typed write.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| RampartError::cache(format!("failed to encode value for '{key}': {e}")))?;
        self.set(key, value, ttl).await;
        Ok(())
    }

    /// Cached value, or the result of `fetch` stored for `ttl`.
    ///
    /// Fetch errors propagate and nothing is cached.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get_json(key).await {
            return Ok(cached);
        }
        let value = fetch().await?;
        if let Err(e) = self.set_json(key, &value, ttl).await {
            warn!(key, error = %e, "fetched value not cached");
        }
        Ok(value)
    }

    /// Drop every L1 entry. The shared tier is left alone.
    pub fn clear_local(&self) {
        self.l1.invalidate_all();
        self.l1.run_pending_tasks();
    }

    /// Most-missed keys since they were last set, highest first.
    pub fn hot_misses(&self, limit: usize) -> Vec<(String, u64)> {
        let mut hot: Vec<(String, u64)> = self
            .hot_misses
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        hot.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hot.truncate(limit);
        hot
    }

    pub fn namespace_stats(&self) -> BTreeMap<String, NamespaceStats> {
        self.namespaces
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Forget per-namespace and hot-miss history for `namespace`.
    pub fn reset_namespace(&self, namespace: &str) {
        self.namespaces.remove(namespace);
        self.hot_misses.retain(|k, _| namespace_of(k) != namespace);
    }

    pub fn stats(&self) -> CacheStats {
        self.l1.run_pending_tasks();
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let hits = load(&self.counters.hits);
        let misses = load(&self.counters.misses);
        let size_bytes = self
            .l1
            .iter()
            .map(|(_, v)| v.approx_size() as u64)
            .sum();
        CacheStats {
            hits,
            misses,
            l1_hits: load(&self.counters.l1_hits),
            l2_hits: load(&self.counters.l2_hits),
            sets: load(&self.counters.sets),
            deletes: load(&self.counters.deletes),
            errors: load(&self.counters.errors),
            evictions: load(&self.counters.evictions),
            expirations: load(&self.counters.expirations),
            entries: self.l1.entry_count(),
            capacity: self.config.l1_max_entries,
            size_bytes,
            hit_rate: ratio(hits, hits + misses),
            l2_backend: self.l2.as_ref().map(|l2| l2.name().to_string()),
            namespaces: self.namespace_stats(),
        }
    }

    /// Zero every counter. Entries are kept.
    pub fn reset_stats(&self) {
        self.counters.reset();
        self.namespaces.clear();
        self.hot_misses.clear();
    }

    fn record_hit(&self, namespace: &str, tier: &'static str) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .hits += 1;
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
    }

    fn record_miss(&self, namespace: &str, key: &str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .misses += 1;
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);

        if let Some(mut count) = self.hot_misses.get_mut(key) {
            *count += 1;
        } else if self.hot_misses.len() < self.config.hot_miss_capacity {
            self.hot_misses.insert(key.to_string(), 1);
        }
    }

    fn record_l2_error(&self, l2: &dyn SharedCache, op: &'static str, e: &RampartError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_ERRORS_TOTAL, "op" => op).increment(1);
        warn!(backend = l2.name(), op, error = %e.message, "shared cache unavailable, using local tier");
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::MemorySharedCache;

    #[tokio::test]
    async fn l1_round_trip() {
        let cache = TieredCache::new(CacheConfig::default());
        cache.set("boards:1", json!({"id": 1}), Duration::from_secs(60)).await;
        assert_eq!(cache.get("boards:1").await, Some(json!({"id": 1})));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.entries, 1);
        assert!(!stats.l2_enabled());
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let cache = TieredCache::new(CacheConfig::default());
        cache.set("boards:1", json!(1), Duration::ZERO).await;
        assert!(cache.get("boards:1").await.is_none());
        assert_eq!(cache.stats().sets, 0);
    }

    #[tokio::test]
    async fn l2_hit_backfills_l1() {
        let l2 = Arc::new(MemorySharedCache::new());
        l2.set(&CacheEntry::new("sprints:5", json!("s"), Duration::from_secs(60)))
            .await
            .unwrap();
        let cache = TieredCache::with_shared(CacheConfig::default(), l2);

        assert_eq!(cache.get("sprints:5").await, Some(json!("s")));
        assert_eq!(cache.get("sprints:5").await, Some(json!("s")));
        let stats = cache.stats();
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l1_hits, 1);
    }

    #[tokio::test]
    async fn misses_are_tracked_per_namespace_and_key() {
        let cache = TieredCache::new(CacheConfig::default());
        for _ in 0..3 {
            cache.get("velocity:1:5").await;
        }
        cache.get("health:jira").await;
        assert_eq!(cache.namespace_stats()["velocity"].misses, 3);
        assert_eq!(cache.hot_misses(1), vec![("velocity:1:5".to_string(), 3)]);

        cache.set("velocity:1:5", json!(1), Duration::from_secs(60)).await;
        assert_eq!(cache.hot_misses(10).len(), 1);
    }

    #[tokio::test]
    async fn hot_miss_tracking_is_bounded() {
        let cache = TieredCache::new(CacheConfig::default().hot_miss_capacity(2));
        for i in 0..5 {
            cache.get(&format!("a:{i}")).await;
        }
        assert_eq!(cache.hot_misses(10).len(), 2);
    }

    #[tokio::test]
    async fn invalidate_pattern_spares_other_namespaces() {
        let cache = TieredCache::new(CacheConfig::default());
        let ttl = Duration::from_secs(60);
        cache.set("sprints:1", json!(1), ttl).await;
        cache.set("sprints:2", json!(2), ttl).await;
        cache.set("sprint_issues:1", json!(3), ttl).await;

        assert_eq!(cache.invalidate_pattern("sprints:*").await, 2);
        assert!(cache.get("sprints:1").await.is_none());
        assert!(cache.get("sprint_issues:1").await.is_some());
        assert_eq!(cache.stats().deletes, 2);
    }

    #[tokio::test]
    async fn get_json_shape_mismatch_is_a_miss() {
        let cache = TieredCache::new(CacheConfig::default());
        cache.set("boards:1", json!("not a number"), Duration::from_secs(60)).await;
        assert_eq!(cache.get_json::<u32>("boards:1").await, None);
        assert_eq!(cache.stats().errors, 1);
    }

    #[test]
    fn config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(CacheConfig::default().l1_max_entries(0).validate().is_err());
        assert!(
            CacheConfig::default()
                .default_ttl("x", Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn ratio_handles_zero() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }
}

//! Redis-backed shared cache tier.
//!
//! Entries are stored as JSON strings with a server-side expiry
//! (`SET key value PX ttl_ms`), so Redis evicts them without help.
//! Namespace invalidation walks `SCAN MATCH` rather than `KEYS`.

use async_trait::async_trait;
use redis::Client;
use redis::aio::ConnectionManager;

use super::{CacheEntry, SharedCache};
use crate::{RampartError, Result};

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

pub struct RedisSharedCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g. `"rampart:"`).
    prefix: String,
}

impl std::fmt::Debug for RedisSharedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSharedCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisSharedCache {
    /// Connect without a key prefix.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::with_prefix(url, None).await
    }

    /// Connect, prepending `prefix` to every key. Useful when sharing a
    /// Redis instance with other applications.
    pub async fn with_prefix(url: &str, prefix: Option<&str>) -> Result<Self> {
        let client = Client::open(url).map_err(|e| redis_error("open", e))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_error("connect", e))?;
        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.prefix).unwrap_or(key)
    }
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("GET", e))?;
        raw.map(|s| {
            serde_json::from_str(&s)
                .map_err(|e| RampartError::cache(format!("corrupt cache entry for '{key}': {e}")))
        })
        .transpose()
    }

    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        let ttl_ms = entry.remaining_ttl().as_millis();
        if ttl_ms == 0 {
            return Ok(());
        }
        let body = serde_json::to_string(entry)
            .map_err(|e| RampartError::cache(format!("failed to encode cache entry: {e}")))?;
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(self.prefixed_key(&entry.key))
            .arg(body)
            .arg("PX")
            .arg(u64::try_from(ttl_ms).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("SET", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.prefixed_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("DEL", e))?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = scan_pattern(&self.prefix, pattern);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("SCAN", e))?;
            keys.extend(batch.iter().map(|k| self.strip_prefix(k).to_string()));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

/// `SCAN MATCH` pattern for `pattern` under a literal `prefix`.
fn scan_pattern(prefix: &str, pattern: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + pattern.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push_str(pattern);
    out
}

fn redis_error(op: &str, e: redis::RedisError) -> RampartError {
    RampartError::cache(format!("redis {op} failed: {e}"))
}

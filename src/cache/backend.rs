//! Shared (L2) cache tier abstraction.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheEntry, matches_pattern};
use crate::Result;

/// A cache shared between processes, reached over the network.
///
/// Implementations must honour each entry's TTL and treat `scan` patterns
/// as prefix globs (`namespace:*`). Errors are reported, not swallowed;
/// [`TieredCache`](super::TieredCache) decides how to degrade.
#[async_trait]
pub trait SharedCache: Send + Sync + fmt::Debug {
    /// Backend name for logs and stats.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn set(&self, entry: &CacheEntry) -> Result<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;
}

/// In-process [`SharedCache`], useful for tests and single-node setups.
#[derive(Debug, Default)]
pub struct MemorySharedCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.entries.retain(|_, e| !e.is_expired());
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self.entries.get(key).map(|e| e.value().clone());
        match entry {
            Some(entry) if entry.is_expired() => {
                self.entries.remove(key);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired() && matches_pattern(e.key(), pattern))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}

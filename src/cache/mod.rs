//! Two-tier caching.
//!
//! - [`TieredCache`] — bounded in-process L1 (moka) in front of an optional
//!   shared L2 ([`SharedCache`]). L2 failures degrade to L1-only operation
//!   and are never surfaced to callers.
//! - [`CacheKey`] / [`keys`] — deterministic, namespace-scoped keys.
//! - [`TtlPolicy`] — TTLs derived from the cached entity's [`Lifecycle`]
//!   rather than a single global constant.
//! - [`optimizer::CacheOptimizer`] — advisory tuning from observed counters.

pub mod backend;
pub mod keys;
pub mod optimizer;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
pub mod ttl;

pub use backend::{MemorySharedCache, SharedCache};
pub use optimizer::{CacheOptimizer, CacheWarmer, OptimizationReport, Recommendation};
pub use store::{CacheConfig, CacheStats, NamespaceStats, TieredCache};
pub use ttl::{Lifecycle, LifecycleTtls, TtlPolicy};

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between namespace and parameters.
pub const SEPARATOR: char = ':';

/// Rendering of an absent optional key parameter.
const ABSENT: char = '~';

/// A cached value with its TTL and creation time.
///
/// This is also the document stored in the shared tier, so a value read
/// back from L2 carries enough information to backfill L1 with the
/// remaining lifetime only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub ttl_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            created_at: Utc::now(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Lifetime left at `now`, zero once expired.
    pub fn remaining_ttl_at(&self, now: DateTime<Utc>) -> Duration {
        let age_ms = (now - self.created_at).num_milliseconds().max(0);
        let age_ms = u64::try_from(age_ms).unwrap_or(0);
        Duration::from_millis(self.ttl_ms.saturating_sub(age_ms))
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.remaining_ttl_at(Utc::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ttl().is_zero()
    }

    /// Rough in-memory footprint: key plus serialized value.
    pub fn approx_size(&self) -> usize {
        self.key.len() + self.value.to_string().len()
    }
}

/// Builder for `namespace:param:param...` keys.
///
/// `%`, `:`, `~` and the glob metacharacters `*`, `?`, `[`, `]`, `\` are
/// percent-encoded in every segment, so distinct `(namespace, params)`
/// tuples always produce distinct keys and a namespace prefix pattern
/// never matches another namespace. An absent optional parameter renders
/// as a bare `~`, which no present value can produce.
///
/// ```rust
/// # use rampart::cache::CacheKey;
/// let key = CacheKey::new("sprints").param(42).param("a:b").build();
/// assert_eq!(key, "sprints:42:a%3Ab");
///
/// let key = CacheKey::new("commits").opt_param(None::<&str>).opt_param(Some("~")).build();
/// assert_eq!(key, "commits:~:%7E");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    params: Vec<Option<String>>,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            params: Vec::new(),
        }
    }

    /// Append one ordered parameter.
    pub fn param(mut self, param: impl fmt::Display) -> Self {
        self.params.push(Some(param.to_string()));
        self
    }

    /// Append an optional parameter; `None` stays distinct from every value.
    pub fn opt_param(mut self, param: Option<impl fmt::Display>) -> Self {
        self.params.push(param.map(|p| p.to_string()));
        self
    }

    /// Append several ordered parameters.
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.params
            .extend(params.into_iter().map(|p| Some(p.to_string())));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn build(&self) -> String {
        let mut key = escape(&self.namespace);
        for param in &self.params {
            key.push(SEPARATOR);
            match param {
                Some(p) => key.push_str(&escape(p)),
                None => key.push(ABSENT),
            }
        }
        key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.build()
    }
}

/// Prefix pattern matching every key in `namespace`.
pub fn pattern(namespace: &str) -> String {
    format!("{}{SEPARATOR}*", escape(namespace))
}

/// Decoded namespace of a built key.
pub fn namespace_of(key: &str) -> String {
    let raw = key.split(SEPARATOR).next().unwrap_or(key);
    unescape(raw)
}

/// Whether `key` matches `pattern`. A trailing `*` matches any suffix;
/// otherwise the match is exact.
pub fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '~' => out.push_str("%7E"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest.get(idx + 1..idx + 3);
        let decoded = match code {
            Some("25") => Some('%'),
            Some("3A") => Some(':'),
            Some("7E") => Some('~'),
            Some("2A") => Some('*'),
            Some("3F") => Some('?'),
            Some("5B") => Some('['),
            Some("5D") => Some(']'),
            Some("5C") => Some('\\'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[idx + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[idx + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

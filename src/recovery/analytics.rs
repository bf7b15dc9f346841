//! Error analytics: aggregate counters plus a bounded history.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ErrorKind;
use crate::RampartError;

/// Default number of records retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One surfaced error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub operation: String,
    pub kind: ErrorKind,
    /// Sanitized detail.
    pub message: String,
}

impl ErrorRecord {
    pub fn new(tool: &str, operation: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            tool: tool.to_owned(),
            operation: operation.to_owned(),
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(tool: &str, operation: &str, err: &RampartError) -> Self {
        Self::new(tool, operation, err.kind, err.message.clone())
    }
}

/// Serializable analytics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorAnalyticsReport {
    pub total: u64,
    pub by_tool: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    /// Oldest first.
    pub recent: Vec<ErrorRecord>,
}

/// Counters by tool and kind, plus a ring buffer of recent records.
#[derive(Debug)]
pub struct ErrorAnalytics {
    capacity: usize,
    total: AtomicU64,
    by_tool: DashMap<String, u64>,
    by_kind: DashMap<ErrorKind, u64>,
    recent: Mutex<VecDeque<ErrorRecord>>,
}

impl Default for ErrorAnalytics {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ErrorAnalytics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            total: AtomicU64::new(0),
            by_tool: DashMap::new(),
            by_kind: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Count `record` and append it, evicting the oldest when full.
    pub fn record(&self, record: ErrorRecord) {
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.by_tool.entry(record.tool.clone()).or_insert(0) += 1;
        *self.by_kind.entry(record.kind).or_insert(0) += 1;

        if self.capacity == 0 {
            return;
        }
        let mut recent = self.recent.lock();
        while recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Recent records, oldest first.
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn report(&self) -> ErrorAnalyticsReport {
        ErrorAnalyticsReport {
            total: self.total(),
            by_tool: self
                .by_tool
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            by_kind: self.by_kind.iter().map(|e| (*e.key(), *e.value())).collect(),
            recent: self.recent(),
        }
    }

    pub fn clear(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.by_tool.clear();
        self.by_kind.clear();
        self.recent.lock().clear();
    }
}

//! Per-origin request history used by behavioral bot checks.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default maximum entries kept per origin.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// One past request from an origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

impl RequestRecord {
    pub fn new(timestamp: DateTime<Utc>, path: impl Into<String>) -> Self {
        Self {
            timestamp,
            path: path.into(),
        }
    }
}

/// Store of bounded per-origin request histories.
///
/// Implementations must make `record` atomic per origin: concurrent requests
/// from the same origin must not lose appends.
pub trait RequestHistoryStore: Send + Sync {
    /// Append a request and return the origin's history, oldest first,
    /// including the new entry.
    fn record(&self, origin: &str, record: RequestRecord) -> Vec<RequestRecord>;

    /// Current history of an origin, oldest first.
    fn recent(&self, origin: &str) -> Vec<RequestRecord>;

    /// Drop entries older than `cutoff`; origins left empty are removed.
    /// Returns the number of origins removed.
    fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize;

    /// Number of tracked origins.
    fn origin_count(&self) -> usize;
}

/// In-memory history store on a sharded map.
#[derive(Debug)]
pub struct InMemoryHistoryStore {
    entries: DashMap<String, VecDeque<RequestRecord>>,
    max_entries: usize,
}

impl InMemoryHistoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl RequestHistoryStore for InMemoryHistoryStore {
    fn record(&self, origin: &str, record: RequestRecord) -> Vec<RequestRecord> {
        let mut history = self
            .entries
            .entry(origin.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_entries));

        while history.len() >= self.max_entries {
            history.pop_front();
        }
        history.push_back(record);
        history.iter().cloned().collect()
    }

    fn recent(&self, origin: &str) -> Vec<RequestRecord> {
        self.entries
            .get(origin)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, history| {
            while history.front().is_some_and(|r| r.timestamp < cutoff) {
                history.pop_front();
            }
            !history.is_empty()
        });
        before.saturating_sub(self.entries.len())
    }

    fn origin_count(&self) -> usize {
        self.entries.len()
    }
}

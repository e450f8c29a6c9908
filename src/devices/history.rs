//! MRU bookkeeping for forced device reuse.
//!
//! Each allocation batch stamps its devices with the current time plus an
//! ordering offset that shrinks along the batch:
//!
//! ```text
//! last_ord_adj = window * (N - index) / N
//! ```
//!
//! The list is kept sorted ascending by `last_access_ts + last_ord_adj`, so
//! the head is the device most worth reusing. Inside one batch the first
//! device looks most recently used; across batches spaced at least `window`
//! apart the older batch always sorts first. This is a blended batch-recency
//! heuristic, not a strict LRU.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Default spread of the within-batch offset (10 minutes).
pub const DEFAULT_WINDOW_MS: i64 = 10 * 60 * 1000;

/// Allocation bookkeeping for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub device_id: String,
    /// Epoch milliseconds of the last allocation.
    pub last_access_ts: i64,
    /// Within-batch ordering offset in milliseconds.
    pub last_ord_adj: i64,
}

impl AllocationRecord {
    /// Key the list is ordered by.
    pub fn sort_key(&self) -> i64 {
        self.last_access_ts + self.last_ord_adj
    }
}

/// Device ids ordered from most to least reusable.
#[derive(Debug, Clone)]
pub struct AllocationHistory {
    records: Vec<AllocationRecord>,
    window_ms: i64,
}

impl Default for AllocationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl AllocationHistory {
    pub fn new(window_ms: i64) -> Self {
        Self {
            records: Vec::new(),
            window_ms,
        }
    }

    /// Rebuild from persisted records. Duplicates keep their first entry.
    pub fn from_records(records: Vec<AllocationRecord>, window_ms: i64) -> Self {
        let mut seen = HashSet::new();
        let mut records: Vec<AllocationRecord> = records
            .into_iter()
            .filter(|r| seen.insert(r.device_id.clone()))
            .collect();
        records.sort_by_key(AllocationRecord::sort_key);
        Self { records, window_ms }
    }

    /// Stamp a batch of allocated ids at `now_ms` and re-sort.
    pub fn update(&mut self, device_ids: &[String], now_ms: i64) {
        let mut seen = HashSet::new();
        let batch: Vec<&String> = device_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .collect();
        if batch.is_empty() {
            return;
        }
        let n = batch.len() as i64;
        self.records.retain(|r| !seen.contains(r.device_id.as_str()));
        for (index, id) in batch.into_iter().enumerate() {
            self.records.push(AllocationRecord {
                device_id: id.clone(),
                last_access_ts: now_ms,
                last_ord_adj: self.window_ms * (n - index as i64) / n,
            });
        }
        self.records.sort_by_key(AllocationRecord::sort_key);
    }

    /// The `n` most reusable device ids.
    pub fn oldest(&self, n: usize) -> impl Iterator<Item = &str> {
        self.records.iter().take(n).map(|r| r.device_id.as_str())
    }

    /// Drop a device from the bookkeeping. Returns `true` if it was tracked.
    pub fn remove(&mut self, device_id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.device_id != device_id);
        self.records.len() != before
    }

    pub fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

//! TTL key-value cache for weather lookups.
//!
//! Entries expire at the absolute `expire_time_gmt` the provider embeds in
//! each payload. Expiry is checked lazily on [`TtlCache::get`]. When the
//! cache is full, [`TtlCache::put`] evicts the oldest-*inserted* key; reads
//! do not refresh an entry's position, so a hot key can still be evicted.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::WeatherQuery;

/// Default number of distinct keys kept.
pub const DEFAULT_CAPACITY: usize = 100;

/// A cacheable value that knows when it goes stale.
pub trait Expiring {
    /// Absolute expiry in unix seconds, if the payload declares one.
    fn expire_time_gmt(&self) -> Option<i64>;
}

impl Expiring for serde_json::Value {
    /// Reads `metadata.expire_time_gmt`, falling back to a top-level field.
    fn expire_time_gmt(&self) -> Option<i64> {
        self.pointer("/metadata/expire_time_gmt")
            .or_else(|| self.get("expire_time_gmt"))
            .and_then(serde_json::Value::as_i64)
    }
}

/// Insertion-ordered cache with provider-declared expiry.
pub struct TtlCache<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V: Expiring + Clone> TtlCache<V> {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Cached value for `query`, or `None` if absent or expired.
    pub fn get(&mut self, query: &WeatherQuery) -> Option<V> {
        self.get_at(query, now_secs())
    }

    pub(crate) fn get_at(&mut self, query: &WeatherQuery, now: i64) -> Option<V> {
        let key = query.cache_key();
        let fresh = self
            .entries
            .get(&key)
            .map(|v| v.expire_time_gmt().is_some_and(|t| t > now))?;
        if fresh {
            return self.entries.get(&key).cloned();
        }
        debug!(key = %key, "Weather cache entry expired, removing");
        self.remove_key(&key);
        None
    }

    /// Store `value` for `query`.
    ///
    /// A key already present moves to the newest insertion position. Values
    /// without an expiry are not cached.
    pub fn put(&mut self, query: &WeatherQuery, value: V) {
        if value.expire_time_gmt().is_none() {
            debug!("Weather payload has no expiry, not caching");
            return;
        }
        let key = query.cache_key();
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                debug!(key = %oldest, "Evicting oldest weather cache entry");
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// `true` if `query` has an entry, expired or not.
    pub fn contains(&self, query: &WeatherQuery) -> bool {
        self.entries.contains_key(&query.cache_key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn remove_key(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

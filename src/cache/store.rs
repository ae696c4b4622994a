//! Time-stamped response cache with write-recency eviction.
//!
//! A `CacheManager` owns one table of canonical key → entry. Every mutation
//! is written through to the durable store so the table survives restarts.
//! Several managers run side by side (list, detail, hot, ...) and are kept
//! consistent by broadcasting the same change through `update_all`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::infra::storage::KvStore;
use crate::util::clock::{Clock, duration_millis};
use crate::util::lock::{rw_read, rw_write};

use super::config::CacheOptions;
use super::keys::encode_key;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "nebula_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "nebula_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "nebula_cache_evict_total";

/// A cached value and the moment it was written.
///
/// The canonical key is the entry's position in the owning table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Unix milliseconds of the last `set`.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    /// Per-cache write counter; orders writes that share a timestamp.
    #[serde(default)]
    pub seq: u64,
}

/// Point-in-time counters; computing them never mutates the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub max_size: usize,
    #[serde(rename = "ttlMs", serialize_with = "serialize_millis")]
    pub ttl: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration_millis(*duration))
}

struct CacheTable<T> {
    entries: HashMap<String, CacheEntry<T>>,
    next_seq: u64,
}

impl<T> CacheTable<T> {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    fn from_entries(entries: HashMap<String, CacheEntry<T>>) -> Self {
        let next_seq = entries
            .values()
            .map(|entry| entry.seq.saturating_add(1))
            .max()
            .unwrap_or(0);
        Self { entries, next_seq }
    }
}

/// Keyed cache with TTL expiry, an entry ceiling and durable snapshots.
pub struct CacheManager<T> {
    options: CacheOptions,
    storage: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    table: RwLock<CacheTable<T>>,
}

impl<T> CacheManager<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Create a cache, hydrate it from `storage` and drop anything already stale.
    pub fn new(options: CacheOptions, storage: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let manager = Self {
            options,
            storage,
            clock,
            table: RwLock::new(CacheTable::empty()),
        };
        manager.initialize();
        manager
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Reload the table from durable storage, then purge expired entries.
    pub fn initialize(&self) {
        let table = self.hydrate();
        debug!(
            cache = %self.options.storage_key,
            entries = table.entries.len(),
            "Cache hydrated"
        );
        *rw_write(&self.table, SOURCE, "initialize") = table;
        self.clear_expired();
    }

    fn hydrate(&self) -> CacheTable<T> {
        let Some(raw) = self.storage.load(&self.options.storage_key) else {
            return CacheTable::empty();
        };
        match serde_json::from_str::<HashMap<String, CacheEntry<T>>>(&raw) {
            Ok(entries) => CacheTable::from_entries(entries),
            Err(err) => {
                warn!(
                    cache = %self.options.storage_key,
                    error = %err,
                    "Discarding unreadable cache snapshot"
                );
                CacheTable::empty()
            }
        }
    }

    fn persist(&self, table: &CacheTable<T>) {
        let snapshot = match serde_json::to_string(&table.entries) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(cache = %self.options.storage_key, error = %err, "Cache snapshot encode failed");
                return;
            }
        };
        if let Err(err) = self.storage.save(&self.options.storage_key, &snapshot) {
            warn!(cache = %self.options.storage_key, error = %err, "Cache snapshot save failed");
        }
    }

    fn canonical<K: Serialize + ?Sized>(&self, key: &K) -> Option<String> {
        match encode_key(key) {
            Ok(cache_key) => Some(cache_key),
            Err(err) => {
                debug!(cache = %self.options.storage_key, error = %err, "Unencodable cache key treated as miss");
                None
            }
        }
    }

    fn is_expired(&self, created_at: i64, now: i64) -> bool {
        now.saturating_sub(created_at) >= duration_millis(self.options.ttl)
    }

    fn record(&self, metric: &'static str, amount: u64) {
        counter!(metric, "cache" => self.options.storage_key.clone()).increment(amount);
    }

    /// Fresh data for `key`, or `None` when absent or expired.
    ///
    /// An expired entry found here is deleted.
    pub fn get<K: Serialize + ?Sized>(&self, key: &K) -> Option<T> {
        let cache_key = self.canonical(key)?;
        let now = self.clock.now_millis();

        {
            let table = rw_read(&self.table, SOURCE, "get");
            match table.entries.get(&cache_key) {
                None => {
                    self.record(METRIC_CACHE_MISS, 1);
                    return None;
                }
                Some(entry) if !self.is_expired(entry.created_at, now) => {
                    self.record(METRIC_CACHE_HIT, 1);
                    return Some(entry.data.clone());
                }
                Some(_) => {}
            }
        }

        let mut table = rw_write(&self.table, SOURCE, "get.expire");
        let expired = table
            .entries
            .get(&cache_key)
            .map(|entry| self.is_expired(entry.created_at, now));
        let fresh = match expired {
            Some(true) => {
                table.entries.remove(&cache_key);
                self.persist(&table);
                None
            }
            Some(false) => table.entries.get(&cache_key).map(|entry| entry.data.clone()),
            None => None,
        };
        self.record(
            if fresh.is_some() {
                METRIC_CACHE_HIT
            } else {
                METRIC_CACHE_MISS
            },
            1,
        );
        fresh
    }

    /// Write `data` under `key` with the current time, then trim to `max_size`.
    pub fn set<K: Serialize + ?Sized>(&self, key: &K, data: T) {
        let Some(cache_key) = self.canonical(key) else {
            return;
        };
        let now = self.clock.now_millis();

        let mut table = rw_write(&self.table, SOURCE, "set");
        let seq = table.next_seq;
        table.next_seq = seq.saturating_add(1);
        table.entries.insert(
            cache_key,
            CacheEntry {
                data,
                created_at: now,
                seq,
            },
        );

        let evicted = limit_size(&mut table.entries, self.options.max_size.get());
        if evicted > 0 {
            debug!(cache = %self.options.storage_key, evicted, "Cache trimmed to capacity");
            self.record(METRIC_CACHE_EVICT, evicted as u64);
        }
        self.persist(&table);
    }

    pub fn remove<K: Serialize + ?Sized>(&self, key: &K) {
        let Some(cache_key) = self.canonical(key) else {
            return;
        };
        let mut table = rw_write(&self.table, SOURCE, "remove");
        table.entries.remove(&cache_key);
        self.persist(&table);
    }

    pub fn has<K: Serialize + ?Sized>(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Drop every entry and persist the empty table.
    pub fn clear(&self) {
        let mut table = rw_write(&self.table, SOURCE, "clear");
        table.entries.clear();
        self.persist(&table);
    }

    /// Delete expired entries; persists only when something was removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut table = rw_write(&self.table, SOURCE, "clear_expired");
        let before = table.entries.len();
        table
            .entries
            .retain(|_, entry| !self.is_expired(entry.created_at, now));
        let removed = before - table.entries.len();
        if removed > 0 {
            self.persist(&table);
        }
        removed
    }

    /// Apply `updater` to every live entry in place.
    ///
    /// Returning `None` leaves the entry untouched; `Some` replaces its data
    /// without changing its timestamp. Expired entries are deleted instead of
    /// visited. The table is locked for the whole pass, so `updater` sees the
    /// entries present when the call began and must not reach back into this
    /// same cache. Returns the number of entries rewritten.
    pub fn update_all<F>(&self, mut updater: F) -> usize
    where
        F: FnMut(&T, &str) -> Option<T>,
    {
        let now = self.clock.now_millis();
        let mut table = rw_write(&self.table, SOURCE, "update_all");

        let mut dirty = false;
        let mut rewritten = 0;
        let keys: Vec<String> = table.entries.keys().cloned().collect();
        for cache_key in keys {
            let expired = match table.entries.get(&cache_key) {
                Some(entry) => self.is_expired(entry.created_at, now),
                None => continue,
            };
            if expired {
                table.entries.remove(&cache_key);
                dirty = true;
                continue;
            }
            let Some(entry) = table.entries.get_mut(&cache_key) else {
                continue;
            };
            if let Some(next) = updater(&entry.data, &cache_key) {
                entry.data = next;
                rewritten += 1;
                dirty = true;
            }
        }

        if dirty {
            self.persist(&table);
        }
        rewritten
    }

    pub fn get_stats(&self) -> CacheStats {
        let now = self.clock.now_millis();
        let table = rw_read(&self.table, SOURCE, "get_stats");
        let expired = table
            .entries
            .values()
            .filter(|entry| self.is_expired(entry.created_at, now))
            .count();
        CacheStats {
            total: table.entries.len(),
            valid: table.entries.len() - expired,
            expired,
            max_size: self.options.max_size.get(),
            ttl: self.options.ttl,
        }
    }

    /// Canonical keys currently held, expired ones included.
    pub fn keys(&self) -> Vec<String> {
        rw_read(&self.table, SOURCE, "keys")
            .entries
            .keys()
            .cloned()
            .collect()
    }

    /// Data of every unexpired entry, in no particular order.
    pub fn values(&self) -> Vec<T> {
        let now = self.clock.now_millis();
        rw_read(&self.table, SOURCE, "values")
            .entries
            .values()
            .filter(|entry| !self.is_expired(entry.created_at, now))
            .map(|entry| entry.data.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.table, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keep only the `max_size` most recently written entries.
fn limit_size<T>(entries: &mut HashMap<String, CacheEntry<T>>, max_size: usize) -> usize {
    if entries.len() <= max_size {
        return 0;
    }

    let mut ranked: Vec<(i64, u64, String)> = entries
        .iter()
        .map(|(key, entry)| (entry.created_at, entry.seq, key.clone()))
        .collect();
    ranked.sort_unstable_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

    let mut evicted = 0;
    for (_, _, key) in ranked.into_iter().skip(max_size) {
        entries.remove(&key);
        evicted += 1;
    }
    evicted
}

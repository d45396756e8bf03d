//! LRU cache core: keyed store, byte-budget eviction and expiration.
//!
//! This is the single-threaded heart of the server. It pairs a `HashMap`
//! index with the recency list so that lookup, promotion, eviction and
//! removal are all O(1). The index and the list are kept in strict 1:1
//! correspondence, and `total_bytes` is maintained incrementally on every
//! store, eviction and removal rather than recomputed by scanning.
//!
//! Concurrency is handled one level up: `StorageEngine` wraps this type in a
//! mutex and holds the lock for the duration of each call, so nothing here
//! needs to be thread-safe.
//!
//! ## Expiration
//!
//! Expiration is lazy on the read path: `get`, `peek` and `contains_live`
//! never observe an expired entry, removing it as a side effect instead. The
//! background sweeper calls `sweep_expired` to reclaim entries that are never
//! read again. Eviction, by contrast, is pure byte accounting and ignores
//! freshness: under capacity pressure an unexpired tail entry goes first.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::storage::list::{NodeRef, RecencyList};

/// Exptime values up to this many seconds are relative to "now"; anything
/// larger is an absolute Unix timestamp. 30 days, the memcached convention.
pub const RELATIVE_EXPTIME_LIMIT_SECS: i64 = 30 * 24 * 60 * 60;

/// Errors from cache construction and storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The configured byte budget was zero.
    #[error("<max_capacity> must not be negative")]
    InvalidCapacity,

    /// A single item is larger than the whole cache; no amount of eviction
    /// can admit it.
    #[error("item of {length} bytes exceeds the cache capacity of {capacity} bytes")]
    ItemTooLarge { length: usize, capacity: usize },
}

/// One stored item: data block plus its protocol-visible metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    /// Opaque 16-bit client metadata, echoed back verbatim on retrieval.
    pub flags: u16,
    /// Canonicalized expiration instant; `None` never expires.
    pub expires_at: Option<SystemTime>,
    pub data: Bytes,
    /// Unique per store event; compared by the `cas` command.
    pub cas: u64,
}

impl CacheEntry {
    pub fn new(
        key: String,
        flags: u16,
        expires_at: Option<SystemTime>,
        data: Bytes,
        cas: u64,
    ) -> Self {
        Self {
            key,
            flags,
            expires_at,
            data,
            cas,
        }
    }

    /// Byte length of the data block.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Turns a wire `exptime` into an absolute expiration instant.
///
/// Zero means never expires. Positive values up to
/// [`RELATIVE_EXPTIME_LIMIT_SECS`] are seconds from `now`; larger values are
/// absolute Unix timestamps. Negative values canonicalize to the epoch, i.e.
/// stored but already expired.
pub fn canonical_expiration(exptime: i64, now: SystemTime) -> Option<SystemTime> {
    match exptime {
        0 => None,
        t if t < 0 => Some(UNIX_EPOCH),
        t if t <= RELATIVE_EXPTIME_LIMIT_SECS => Some(now + Duration::from_secs(t as u64)),
        t => Some(UNIX_EPOCH + Duration::from_secs(t as u64)),
    }
}

/// Counters maintained by the core; surfaced through the engine's stats.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheCounters {
    /// Entries removed to make room for a store.
    pub evictions: u64,
    /// Entries removed because their expiration passed (lazy or sweep).
    pub expired_removed: u64,
}

/// Keyed LRU store with a fixed byte budget.
#[derive(Debug, PartialEq)]
pub struct LruCache {
    /// Key -> node in the recency list. Always 1:1 with the list.
    index: HashMap<String, NodeRef>,
    list: RecencyList<CacheEntry>,
    /// Incremental sum of entry lengths over the index.
    total_bytes: usize,
    max_capacity: usize,
    counters: CacheCounters,
}

impl LruCache {
    /// Creates a cache with the given byte budget. Fails on a zero budget.
    pub fn new(max_capacity: usize) -> Result<Self, EngineError> {
        if max_capacity == 0 {
            return Err(EngineError::InvalidCapacity);
        }
        Ok(Self {
            index: HashMap::new(),
            list: RecencyList::new(),
            total_bytes: 0,
            max_capacity,
            counters: CacheCounters::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn counters(&self) -> CacheCounters {
        self.counters
    }

    /// Whether `key` holds a live (present, unexpired) entry. Removes the
    /// entry if it turns out to be expired. Does not touch recency.
    pub fn contains_live(&mut self, key: &str, now: SystemTime) -> bool {
        self.peek(key, now).is_some()
    }

    /// Looks up `key` without promoting it, expiring lazily.
    ///
    /// Used by the conditional commands (`add`, `replace`, `append`,
    /// `prepend`, `cas`) whose no-mutation outcomes must leave recency
    /// untouched.
    pub fn peek(&mut self, key: &str, now: SystemTime) -> Option<&CacheEntry> {
        let node = *self.index.get(key)?;
        if self.list.payload(node).is_expired(now) {
            self.remove_expired(key, node);
            return None;
        }
        Some(self.list.payload(node))
    }

    /// Looks up `key`, promoting it to most-recently used on a hit.
    ///
    /// Never returns an expired entry: an entry found expired is removed and
    /// reported absent.
    pub fn get(&mut self, key: &str, now: SystemTime) -> Option<&CacheEntry> {
        let node = *self.index.get(key)?;
        if self.list.payload(node).is_expired(now) {
            self.remove_expired(key, node);
            return None;
        }
        self.list.move_to_head(node);
        Some(self.list.payload(node))
    }

    /// Upserts an entry, evicting from the tail until it fits.
    ///
    /// Replacing an existing key first retires the old node, so the byte
    /// delta may be negative and shrinking never triggers eviction. An entry
    /// larger than the whole budget is rejected outright, before any
    /// eviction.
    pub fn store(&mut self, entry: CacheEntry) -> Result<(), EngineError> {
        if entry.len() > self.max_capacity {
            return Err(EngineError::ItemTooLarge {
                length: entry.len(),
                capacity: self.max_capacity,
            });
        }

        if let Some(node) = self.index.remove(&entry.key) {
            let old = self.list.unlink(node);
            self.total_bytes -= old.len();
        }

        while self.total_bytes + entry.len() > self.max_capacity {
            self.evict_tail();
        }

        self.total_bytes += entry.len();
        let key = entry.key.clone();
        let node = self.list.push_head(entry);
        self.index.insert(key, node);
        Ok(())
    }

    /// Removes `key` outright. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(node) => {
                let old = self.list.unlink(node);
                self.total_bytes -= old.len();
                true
            }
            None => false,
        }
    }

    /// Removes every entry whose expiration has passed.
    ///
    /// Iterates over a snapshot of the keys so removal during the pass never
    /// touches a collection mid-iteration. Returns the number of entries
    /// removed.
    pub fn sweep_expired(&mut self, now: SystemTime) -> u64 {
        let keys: Vec<String> = self.index.keys().cloned().collect();
        let mut removed = 0;
        for key in keys {
            let node = self.index[&key];
            if self.list.payload(node).is_expired(now) {
                self.remove_expired(&key, node);
                removed += 1;
            }
        }
        removed
    }

    fn remove_expired(&mut self, key: &str, node: NodeRef) {
        self.index.remove(key);
        let old = self.list.unlink(node);
        self.total_bytes -= old.len();
        self.counters.expired_removed += 1;
    }

    /// Drops the least-recently used entry to reclaim its bytes.
    fn evict_tail(&mut self) {
        let tail = self
            .list
            .tail()
            .expect("eviction requested on an empty recency list");
        let victim = self.list.unlink(tail);
        self.index.remove(&victim.key);
        self.total_bytes -= victim.len();
        self.counters.evictions += 1;
    }
}

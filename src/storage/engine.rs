//! Shared storage engine: the one mutable resource in the server.
//!
//! `StorageEngine` wraps the LRU core in a single mutex and is shared across
//! every connection task plus the background sweeper via `Arc`. Each public
//! method acquires the lock once and performs the whole command inside that
//! critical section, so check-then-act commands (`add`, `replace`, `cas`,
//! `append`, `prepend`) are atomic with respect to concurrent stores:
//! eviction, insertion and promotion can never interleave. The data block is
//! always fully read off the socket before the engine is invoked, so the
//! lock is never held across network I/O.
//!
//! CAS tokens come from a process-wide monotonic counter; allocation is
//! lock-free, while the compare step of `cas` runs inside the same critical
//! section as its store.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::storage::lru::{CacheCounters, CacheEntry, EngineError, LruCache};

/// Outcome of a storage command, mapping 1:1 to a protocol reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The entry was stored.
    Stored,
    /// A conditional store's condition failed; nothing was mutated.
    NotStored,
    /// `cas` found the key but the token did not match.
    Exists,
    /// `cas` found no such key.
    NotFound,
}

/// Read-only view of one item, handed to the retrieval path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub key: String,
    pub flags: u16,
    pub data: Bytes,
    pub cas: u64,
}

/// Engine statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub items: usize,
    pub total_bytes: usize,
    pub max_capacity: usize,
    pub gets: u64,
    pub hits: u64,
    pub stores: u64,
    pub evictions: u64,
    pub expired_removed: u64,
}

/// The shared cache engine.
///
/// Designed to be wrapped in an `Arc` and cloned into every connection task
/// and the sweeper. All operations are thread-safe.
pub struct StorageEngine {
    cache: Mutex<LruCache>,

    /// Next CAS token; starts at 1 so 0 never names a live store event.
    cas_counter: AtomicU64,

    get_count: AtomicU64,
    hit_count: AtomicU64,
    store_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock().unwrap();
        f.debug_struct("StorageEngine")
            .field("items", &cache.len())
            .field("total_bytes", &cache.total_bytes())
            .field("max_capacity", &cache.max_capacity())
            .finish()
    }
}

impl StorageEngine {
    /// Creates an engine with the given byte budget.
    ///
    /// Fails with [`EngineError::InvalidCapacity`] on a zero budget.
    pub fn new(max_capacity: usize) -> Result<Self, EngineError> {
        Ok(Self {
            cache: Mutex::new(LruCache::new(max_capacity)?),
            cas_counter: AtomicU64::new(1),
            get_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            store_count: AtomicU64::new(0),
        })
    }

    fn next_cas(&self) -> u64 {
        self.cas_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// `set`: unconditional upsert.
    pub fn set(
        &self,
        key: String,
        flags: u16,
        expires_at: Option<SystemTime>,
        data: Bytes,
    ) -> Result<StoreOutcome, EngineError> {
        self.store_count.fetch_add(1, Ordering::Relaxed);
        let entry = CacheEntry::new(key, flags, expires_at, data, self.next_cas());

        let mut cache = self.cache.lock().unwrap();
        cache.store(entry)?;
        Ok(StoreOutcome::Stored)
    }

    /// `add`: store only if the key is absent (or expired).
    pub fn add(
        &self,
        key: String,
        flags: u16,
        expires_at: Option<SystemTime>,
        data: Bytes,
    ) -> Result<StoreOutcome, EngineError> {
        self.store_count.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now();

        let mut cache = self.cache.lock().unwrap();
        if cache.contains_live(&key, now) {
            return Ok(StoreOutcome::NotStored);
        }
        let entry = CacheEntry::new(key, flags, expires_at, data, self.next_cas());
        cache.store(entry)?;
        Ok(StoreOutcome::Stored)
    }

    /// `replace`: store only if the key is already present.
    pub fn replace(
        &self,
        key: String,
        flags: u16,
        expires_at: Option<SystemTime>,
        data: Bytes,
    ) -> Result<StoreOutcome, EngineError> {
        self.store_count.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now();

        let mut cache = self.cache.lock().unwrap();
        if !cache.contains_live(&key, now) {
            return Ok(StoreOutcome::NotStored);
        }
        let entry = CacheEntry::new(key, flags, expires_at, data, self.next_cas());
        cache.store(entry)?;
        Ok(StoreOutcome::Stored)
    }

    /// `append`: concatenate after the existing data block.
    ///
    /// Flags and expiration are retained from the existing entry; the CAS
    /// token is refreshed.
    pub fn append(&self, key: &str, data: Bytes) -> Result<StoreOutcome, EngineError> {
        self.concat(key, data, false)
    }

    /// `prepend`: concatenate before the existing data block.
    pub fn prepend(&self, key: &str, data: Bytes) -> Result<StoreOutcome, EngineError> {
        self.concat(key, data, true)
    }

    fn concat(&self, key: &str, data: Bytes, before: bool) -> Result<StoreOutcome, EngineError> {
        self.store_count.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now();

        let mut cache = self.cache.lock().unwrap();
        let existing = match cache.peek(key, now) {
            Some(e) => e,
            None => return Ok(StoreOutcome::NotStored),
        };

        let mut combined = BytesMut::with_capacity(existing.len() + data.len());
        if before {
            combined.put_slice(&data);
            combined.put_slice(&existing.data);
        } else {
            combined.put_slice(&existing.data);
            combined.put_slice(&data);
        }

        let entry = CacheEntry::new(
            key.to_string(),
            existing.flags,
            existing.expires_at,
            combined.freeze(),
            self.next_cas(),
        );
        cache.store(entry)?;
        Ok(StoreOutcome::Stored)
    }

    /// `cas`: overwrite only if the supplied token matches the stored one.
    ///
    /// The token comparison and the store happen inside one critical
    /// section, so a concurrent `set` either lands before (token mismatch,
    /// `Exists`) or after this call, never in between.
    pub fn cas(
        &self,
        key: String,
        flags: u16,
        expires_at: Option<SystemTime>,
        data: Bytes,
        token: u64,
    ) -> Result<StoreOutcome, EngineError> {
        self.store_count.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now();

        let mut cache = self.cache.lock().unwrap();
        let stored_token = match cache.peek(&key, now) {
            None => return Ok(StoreOutcome::NotFound),
            Some(existing) => existing.cas,
        };
        if stored_token != token {
            return Ok(StoreOutcome::Exists);
        }
        let entry = CacheEntry::new(key, flags, expires_at, data, self.next_cas());
        cache.store(entry)?;
        Ok(StoreOutcome::Stored)
    }

    /// Retrieves every live entry among `keys`, in request order.
    ///
    /// Absent and expired keys are silently skipped; each hit is promoted to
    /// most-recently used.
    pub fn get_many(&self, keys: &[String]) -> Vec<ItemView> {
        self.get_count
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        let now = SystemTime::now();

        let mut cache = self.cache.lock().unwrap();
        let mut hits = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = cache.get(key, now) {
                hits.push(ItemView {
                    key: entry.key.clone(),
                    flags: entry.flags,
                    data: entry.data.clone(),
                    cas: entry.cas,
                });
            }
        }
        self.hit_count
            .fetch_add(hits.len() as u64, Ordering::Relaxed);
        hits
    }

    /// Removes every expired entry. Called by the background sweeper.
    pub fn sweep_expired(&self) -> u64 {
        let now = SystemTime::now();
        self.cache.lock().unwrap().sweep_expired(now)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current sum of stored data-block lengths.
    pub fn total_bytes(&self) -> usize {
        self.cache.lock().unwrap().total_bytes()
    }

    /// The fixed byte budget.
    pub fn max_capacity(&self) -> usize {
        self.cache.lock().unwrap().max_capacity()
    }

    pub fn stats(&self) -> EngineStats {
        let cache = self.cache.lock().unwrap();
        let CacheCounters {
            evictions,
            expired_removed,
        } = cache.counters();
        EngineStats {
            items: cache.len(),
            total_bytes: cache.total_bytes(),
            max_capacity: cache.max_capacity(),
            gets: self.get_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            stores: self.store_count.load(Ordering::Relaxed),
            evictions,
            expired_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine() -> StorageEngine {
        StorageEngine::new(64 * 1024).unwrap()
    }

    fn get_one(engine: &StorageEngine, key: &str) -> Option<ItemView> {
        engine.get_many(&[key.to_string()]).into_iter().next()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            StorageEngine::new(0),
            Err(EngineError::InvalidCapacity)
        ));
    }

    #[test]
    fn test_set_then_get() {
        let engine = engine();
        let outcome = engine
            .set("foo".into(), 7, None, Bytes::from("bar"))
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Stored);

        let hit = get_one(&engine, "foo").unwrap();
        assert_eq!(hit.data, Bytes::from("bar"));
        assert_eq!(hit.flags, 7);
    }

    #[test]
    fn test_add_on_existing_key_keeps_old_value() {
        // add on an empty cache stores; a second add does not.
        let engine = engine();
        assert_eq!(
            engine
                .add("foo".into(), 0, None, Bytes::from("bar"))
                .unwrap(),
            StoreOutcome::Stored
        );
        assert_eq!(
            engine
                .add("foo".into(), 0, None, Bytes::from("baz"))
                .unwrap(),
            StoreOutcome::NotStored
        );
        assert_eq!(get_one(&engine, "foo").unwrap().data, Bytes::from("bar"));
    }

    #[test]
    fn test_add_succeeds_after_expiry() {
        let engine = engine();
        let past = SystemTime::now() - Duration::from_secs(1);
        engine
            .set("k".into(), 0, Some(past), Bytes::from("old"))
            .unwrap();

        assert_eq!(
            engine.add("k".into(), 0, None, Bytes::from("new")).unwrap(),
            StoreOutcome::Stored
        );
        assert_eq!(get_one(&engine, "k").unwrap().data, Bytes::from("new"));
    }

    #[test]
    fn test_replace_missing_key_stores_nothing() {
        let engine = engine();
        assert_eq!(
            engine
                .replace("ghost".into(), 0, None, Bytes::from("value"))
                .unwrap(),
            StoreOutcome::NotStored
        );
        assert!(get_one(&engine, "ghost").is_none());
        assert_eq!(engine.total_bytes(), 0);
    }

    #[test]
    fn test_replace_existing_key() {
        let engine = engine();
        engine.set("k".into(), 2, None, Bytes::from("old")).unwrap();
        assert_eq!(
            engine
                .replace("k".into(), 5, None, Bytes::from("newer"))
                .unwrap(),
            StoreOutcome::Stored
        );

        let hit = get_one(&engine, "k").unwrap();
        assert_eq!(hit.data, Bytes::from("newer"));
        assert_eq!(hit.flags, 5);
    }

    #[test]
    fn test_cas_with_stale_token_leaves_value() {
        // A stale token returns EXISTS and mutates nothing.
        let engine = engine();
        engine
            .set("foo".into(), 0, None, Bytes::from("bar"))
            .unwrap();
        let current = get_one(&engine, "foo").unwrap().cas;

        assert_eq!(
            engine
                .cas("foo".into(), 0, None, Bytes::from("new"), current + 100)
                .unwrap(),
            StoreOutcome::Exists
        );
        assert_eq!(get_one(&engine, "foo").unwrap().data, Bytes::from("bar"));
    }

    #[test]
    fn test_cas_with_current_token_overwrites() {
        let engine = engine();
        engine
            .set("foo".into(), 0, None, Bytes::from("bar"))
            .unwrap();
        let token = get_one(&engine, "foo").unwrap().cas;

        assert_eq!(
            engine
                .cas("foo".into(), 0, None, Bytes::from("new"), token)
                .unwrap(),
            StoreOutcome::Stored
        );
        let hit = get_one(&engine, "foo").unwrap();
        assert_eq!(hit.data, Bytes::from("new"));
        // A fresh token was generated by the winning store.
        assert_ne!(hit.cas, token);
    }

    #[test]
    fn test_cas_missing_key() {
        let engine = engine();
        assert_eq!(
            engine
                .cas("nope".into(), 0, None, Bytes::from("v"), 1)
                .unwrap(),
            StoreOutcome::NotFound
        );
    }

    #[test]
    fn test_cas_detects_interleaved_set() {
        let engine = engine();
        engine.set("k".into(), 0, None, Bytes::from("v1")).unwrap();
        let stale = get_one(&engine, "k").unwrap().cas;

        // Another client wins the race with a plain set.
        engine.set("k".into(), 0, None, Bytes::from("v2")).unwrap();

        assert_eq!(
            engine
                .cas("k".into(), 0, None, Bytes::from("v3"), stale)
                .unwrap(),
            StoreOutcome::Exists
        );
        assert_eq!(get_one(&engine, "k").unwrap().data, Bytes::from("v2"));
    }

    #[test]
    fn test_append_keeps_flags_refreshes_cas() {
        let engine = engine();
        engine
            .set("k".into(), 42, None, Bytes::from("Hello"))
            .unwrap();
        let before = get_one(&engine, "k").unwrap();

        assert_eq!(
            engine.append("k", Bytes::from(" World")).unwrap(),
            StoreOutcome::Stored
        );
        let after = get_one(&engine, "k").unwrap();
        assert_eq!(after.data, Bytes::from("Hello World"));
        assert_eq!(after.flags, 42);
        assert_ne!(after.cas, before.cas);
    }

    #[test]
    fn test_prepend_concatenates_before() {
        let engine = engine();
        engine
            .set("k".into(), 0, None, Bytes::from("World"))
            .unwrap();

        engine.prepend("k", Bytes::from("Hello ")).unwrap();
        assert_eq!(
            get_one(&engine, "k").unwrap().data,
            Bytes::from("Hello World")
        );
    }

    #[test]
    fn test_append_missing_key() {
        let engine = engine();
        assert_eq!(
            engine.append("nope", Bytes::from("x")).unwrap(),
            StoreOutcome::NotStored
        );
        assert!(get_one(&engine, "nope").is_none());
    }

    #[test]
    fn test_cas_tokens_unique_across_stores() {
        let engine = engine();
        let mut seen = std::collections::HashSet::new();
        for i in 0..50 {
            let key = format!("k{}", i);
            engine.set(key.clone(), 0, None, Bytes::from("v")).unwrap();
            assert!(seen.insert(get_one(&engine, &key).unwrap().cas));
        }
    }

    #[test]
    fn test_get_many_preserves_request_order() {
        // Multi-get skips the missing middle key and keeps request order.
        let engine = engine();
        engine.set("k1".into(), 0, None, Bytes::from("v1")).unwrap();
        engine.set("k3".into(), 0, None, Bytes::from("v3")).unwrap();

        let hits = engine.get_many(&["k1".into(), "k2".into(), "k3".into()]);
        let keys: Vec<&str> = hits.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k3"]);
    }

    #[test]
    fn test_item_larger_than_capacity() {
        let engine = StorageEngine::new(8).unwrap();
        let err = engine
            .set("big".into(), 0, None, Bytes::from("123456789"))
            .unwrap_err();
        assert!(matches!(err, EngineError::ItemTooLarge { length: 9, .. }));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::new(16 * 1024 * 1024).unwrap());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    engine
                        .set(key.clone(), 0, None, Bytes::from("value"))
                        .unwrap();
                    engine.get_many(&[key]);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
        assert_eq!(engine.total_bytes(), 1000 * 5);
    }

    #[test]
    fn test_capacity_invariant_under_concurrency() {
        use std::sync::Arc;
        use std::thread;

        // A budget small enough that writers constantly evict each other.
        let engine = Arc::new(StorageEngine::new(512).unwrap());
        let mut handles = vec![];

        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..200 {
                    let key = format!("k{}", (i * 31 + j) % 40);
                    let data = "d".repeat(1 + (j % 60));
                    engine.set(key, 0, None, Bytes::from(data)).unwrap();
                    assert!(engine.total_bytes() <= 512);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(engine.total_bytes() <= 512);
    }
}

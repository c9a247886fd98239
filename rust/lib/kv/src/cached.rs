use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;
use tracing::debug;
use url::form_urlencoded;

use crate::error::KVError;
use crate::traits::{KVStore, Record};

/// Prefix of every cache key written by `CachedKV`.
pub const CACHE_NAMESPACE: &str = "kvstore";

/// How long a cached key listing stays valid.
pub const NAMES_TTL: Duration = Duration::from_secs(15 * 60);

/// Default number of entries for a cache built by `CachedKV::new`.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// A value held by the cache facility.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// Result of a point lookup. `None` caches a miss.
    Value(Option<String>),
    /// Snapshot of `names()`.
    Names(Arc<Vec<String>>),
}

/// Listing snapshots expire after `NAMES_TTL`; point entries never expire on
/// their own.
pub struct ListingExpiry;

impl Expiry<String, CacheEntry> for ListingExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        match value {
            CacheEntry::Names(_) => Some(NAMES_TTL),
            CacheEntry::Value(_) => None,
        }
    }
}

/// The cache facility behind `CachedKV`.
///
/// Cloning is cheap and yields a handle to the same entries. Every wrapper
/// sharing one `KVCache` must wrap the same store: entries are keyed only
/// by the caller's key, so wrappers of different stores would read each
/// other's values and listings.
#[derive(Clone)]
pub struct KVCache {
    entries: Cache<String, CacheEntry>,
    /// Bumped by every write through any wrapper sharing this cache.
    writes: Arc<AtomicU64>,
}

impl KVCache {
    fn write_epoch(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build a cache with the listing expiry policy.
pub fn new_cache(max_capacity: u64) -> KVCache {
    KVCache {
        entries: Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(ListingExpiry)
            .build(),
        writes: Arc::new(AtomicU64::new(0)),
    }
}

/// CachedKV wraps any KVStore with a read-through cache.
///
/// - `get` is cached per key, including misses.
/// - `names` is cached for 15 minutes under one listing key.
/// - `all_items` is never cached.
///
/// Writes go to the wrapped store first and only then drop the key's entry
/// and the listing, so the next read reloads whatever the store accepted.
/// A load that overlaps a write may return the old value, but its entry is
/// dropped once it finishes so it cannot outlive the write.
/// `clear` flushes the entire cache.
pub struct CachedKV<DB: KVStore + ?Sized> {
    db: Arc<DB>,
    cache: KVCache,
}

impl<DB: KVStore + ?Sized> CachedKV<DB> {
    /// Wrap `db` with a private cache.
    pub fn new(db: Arc<DB>) -> Self {
        Self::with_cache(db, new_cache(DEFAULT_CACHE_CAPACITY))
    }

    /// Wrap `db` using an existing cache. Only share a cache between
    /// wrappers of the same store.
    pub fn with_cache(db: Arc<DB>, cache: KVCache) -> Self {
        Self { db, cache }
    }

    fn invalidate(&self, key: &str) {
        self.cache.record_write();
        self.cache.entries.invalidate(&value_key(key));
        self.cache.entries.invalidate(&names_key());
    }

    /// Read-through lookup. If any write happened while loading, the entry
    /// just produced may predate it and is dropped again.
    fn load<F>(&self, cache_key: String, loader: F) -> Result<CacheEntry, KVError>
    where
        F: FnOnce() -> Result<CacheEntry, KVError>,
    {
        let epoch = self.cache.write_epoch();
        let entry = self
            .cache
            .entries
            .try_get_with(cache_key.clone(), loader)
            .map_err(|e| (*e).clone())?;
        if self.cache.write_epoch() != epoch {
            self.cache.entries.invalidate(&cache_key);
        }
        Ok(entry)
    }
}

fn value_key(key: &str) -> String {
    let raw = format!("{}:{}_value", CACHE_NAMESPACE, key);
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

// Unescaped, so it can never equal an escaped value key.
fn names_key() -> String {
    format!("{}:all_names", CACHE_NAMESPACE)
}

impl<DB: KVStore + ?Sized> KVStore for CachedKV<DB> {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        let entry = self.load(value_key(key), || {
            debug!("CachedKV: miss for {:?}", key);
            self.db.get(key).map(CacheEntry::Value)
        })?;

        match entry {
            CacheEntry::Value(value) => Ok(value),
            CacheEntry::Names(_) => self.db.get(key),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        self.db.set(key, value)?;
        self.invalidate(key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.db.delete(key)?;
        self.invalidate(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), KVError> {
        self.db.clear()?;
        self.cache.record_write();
        self.cache.entries.invalidate_all();
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, KVError> {
        let entry = self.load(names_key(), || {
            debug!("CachedKV: reloading key listing");
            self.db.names().map(|names| CacheEntry::Names(Arc::new(names)))
        })?;

        match entry {
            CacheEntry::Names(names) => Ok(names.as_ref().clone()),
            CacheEntry::Value(_) => self.db.names(),
        }
    }

    fn all_items(&self) -> Result<Vec<Record>, KVError> {
        self.db.all_items()
    }
}

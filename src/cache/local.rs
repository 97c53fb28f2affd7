// Local response cache.
// Owns the store handle and applies read-time TTLs, prefix invalidation, and quota recovery.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

use super::backend::{KvStore, OpenStore};
use super::clock::{Clock, SystemClock};
use super::entry::CacheEntry;
use super::file_store::FileDatabase;
use super::keys::{Resource, pattern_prefix, resource_prefix};

/// Default TTL for reads that do not supply one: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Outcome of a cache read.
#[derive(Debug)]
pub enum Lookup<T> {
    /// A valid entry was found.
    Hit(T),
    /// Nothing stored, or the stored entry was too old for the reader's TTL.
    Miss,
    /// The store could not be read, or the payload had the wrong shape.
    Error(CacheError),
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    /// Collapse to "payload or absent", treating errors as misses.
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Error(_) => None,
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Reads that returned a payload.
    pub hits: u64,
    /// Reads that found nothing stored.
    pub misses: u64,
    /// Reads that found an entry too old for their TTL.
    pub expired: u64,
    /// Reads and writes that failed.
    pub errors: u64,
    /// Number of entries currently stored.
    pub entry_count: u64,
    /// Approximate bytes used by stored entries.
    pub bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Expired reads count as misses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.expired;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Durable key-value memoization for read-heavy remote queries.
///
/// The TTL is a property of each read, not of the stored entry: two callers
/// reading the same key with different TTLs can see different outcomes.
/// Entries are never swept; an expired entry is removed when a read finds it.
///
/// The store is opened by [`LocalCache::open`], or on first use. An operation
/// that finds the store closed tries to open it once before proceeding.
pub struct LocalCache {
    opener: Arc<dyn OpenStore>,
    store: RwLock<Option<Arc<dyn KvStore>>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    counters: Counters,
}

impl LocalCache {
    /// Create a cache over `opener`. Nothing is opened yet.
    pub fn new(opener: impl OpenStore + 'static) -> Self {
        Self {
            opener: Arc::new(opener),
            store: RwLock::new(None),
            clock: Arc::new(SystemClock),
            default_ttl: DEFAULT_TTL,
            counters: Counters::default(),
        }
    }

    /// Create a file-backed cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let database = FileDatabase::new(
            config.resolve_root()?,
            config.database.clone(),
            config.version,
            config.store.clone(),
        )
        .with_quota(config.quota_bytes);
        Ok(Self::new(database).with_default_ttl(config.default_ttl()))
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Open the underlying store. A no-op if it is already open.
    pub async fn open(&self) -> Result<()> {
        self.handle().await.map(|_| ())
    }

    /// Drop the store handle. The next operation reopens it.
    pub async fn close(&self) {
        if self.store.write().await.take().is_some() {
            debug!("Closed cache store");
        }
    }

    pub async fn is_open(&self) -> bool {
        self.store.read().await.is_some()
    }

    /// The open store, opening it if needed.
    async fn handle(&self) -> Result<Arc<dyn KvStore>> {
        if let Some(store) = self.store.read().await.as_ref() {
            return Ok(Arc::clone(store));
        }

        let mut slot = self.store.write().await;
        // Another caller may have opened it while we waited for the lock.
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }

        match self.opener.open().await {
            Ok(store) => {
                debug!(store = store.name(), "Opened cache store");
                *slot = Some(Arc::clone(&store));
                Ok(store)
            }
            Err(e) => {
                warn!(error = %e, "Failed to open cache store");
                Err(e)
            }
        }
    }

    /// Read `key`, judging freshness with `ttl`.
    ///
    /// An entry older than `ttl` is deleted and reported as a miss.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Lookup<T> {
        if let Err(e) = validate_key(key) {
            return self.read_error(key, e);
        }
        let store = match self.handle().await {
            Ok(store) => store,
            Err(e) => return self.read_error(key, e),
        };

        let entry = match store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                Counters::bump(&self.counters.misses);
                return Lookup::Miss;
            }
            Err(e) => return self.read_error(key, e),
        };

        let now = self.clock.now_millis();
        if entry.is_expired(ttl, now) {
            debug!(
                key,
                age_ms = entry.age_millis(now),
                ttl_ms = ttl.as_millis(),
                "Cache entry expired, removing"
            );
            Counters::bump(&self.counters.expired);
            if let Err(e) = store.delete(key).await {
                warn!(key, error = %e, "Failed to remove expired cache entry");
            }
            return Lookup::Miss;
        }

        match serde_json::from_value(entry.payload) {
            Ok(value) => {
                Counters::bump(&self.counters.hits);
                Lookup::Hit(value)
            }
            Err(e) => self.read_error(key, e.into()),
        }
    }

    /// Read `key` with `ttl`, returning the payload or nothing.
    /// Failures are indistinguishable from misses here; use [`LocalCache::lookup`]
    /// when the difference matters.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        self.lookup(key, ttl).await.into_option()
    }

    /// Read `key` with the configured default TTL.
    pub async fn get_default<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key, self.default_ttl).await
    }

    /// Store `payload` under `key`, replacing any prior entry.
    ///
    /// When the store is full, entries sharing the key's resource prefix are
    /// purged and the write is retried once. Failures are logged and returned;
    /// callers should treat them as non-fatal.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, payload: &T) -> Result<()> {
        let result = self.write(key, payload).await;
        if let Err(e) = &result {
            Counters::bump(&self.counters.errors);
            warn!(key, error = %e, "Failed to write cache entry");
        }
        result
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, payload: &T) -> Result<()> {
        validate_key(key)?;
        let store = self.handle().await?;
        let payload = serde_json::to_value(payload)?;
        let entry = CacheEntry::new(key, payload, self.clock.now_millis());

        match store.put(&entry).await {
            Err(e) if e.is_quota_exceeded() => {
                let purged = purge_siblings(store.as_ref(), key).await?;
                warn!(key, purged, "Cache quota exceeded, retrying after purge");
                store.put(&entry).await
            }
            other => other,
        }
    }

    /// Remove the entry under `key`, if any.
    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let store = self.handle().await?;
        if store.delete(key).await? {
            debug!(key, "Deleted cache entry");
        }
        Ok(())
    }

    /// Remove every entry whose key starts with `pattern`. A trailing `*` is
    /// stripped first. Matching is on the literal prefix, never a substring.
    ///
    /// Returns the number of entries removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let prefix = pattern_prefix(pattern);
        let store = self.handle().await?;

        let mut removed = 0;
        for key in store.keys_with_prefix(prefix).await? {
            if store.delete(&key).await? {
                removed += 1;
            }
        }

        info!(prefix, removed, "Invalidated cache entries");
        Ok(removed)
    }

    /// Invalidate every entry of a resource category.
    pub async fn invalidate_resource(&self, resource: Resource) -> Result<u64> {
        self.invalidate_pattern(&resource.pattern()).await
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<u64> {
        let removed = self.handle().await?.clear().await?;
        info!(removed, "Cleared cache");
        Ok(removed)
    }

    /// Serve `key` from the cache, or run `fetch` and cache its result.
    ///
    /// Cache read failures fall through to `fetch`; cache write failures are
    /// logged and ignored. Errors from `fetch` are returned unchanged and
    /// nothing is stored.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Lookup::Hit(value) = self.lookup(key, ttl).await {
            return Ok(value);
        }

        let value = fetch().await?;
        // Already logged by `set`; the remote source stays authoritative.
        let _ = self.set(key, &value).await;
        Ok(value)
    }

    /// Every stored key.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = self.handle().await?.keys().await?;
        keys.sort();
        Ok(keys)
    }

    /// Stored keys starting with `prefix`.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = self.handle().await?.keys_with_prefix(prefix).await?;
        keys.sort();
        Ok(keys)
    }

    /// Read counters for this process plus the store's current size.
    pub async fn stats(&self) -> Result<CacheStats> {
        let usage = self.handle().await?.usage().await?;
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            entry_count: usage.entries,
            bytes: usage.bytes,
        })
    }

    fn read_error<T>(&self, key: &str, error: CacheError) -> Lookup<T> {
        Counters::bump(&self.counters.errors);
        debug!(key, error = %error, "Cache read failed");
        Lookup::Error(error)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Remove entries that share `key`'s resource prefix, except `key` itself.
async fn purge_siblings(store: &dyn KvStore, key: &str) -> Result<u64> {
    let mut purged = 0;
    for sibling in store.keys_with_prefix(resource_prefix(key)).await? {
        if sibling != key && store.delete(&sibling).await? {
            purged += 1;
        }
    }
    Ok(purged)
}

// Storage backend traits.
// The cache talks to its persistent key-value store only through these seams.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::entry::StoredEntry;

/// Size of a store's contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
    /// Number of entries held.
    pub entries: u64,
    /// Approximate bytes used by serialized entries.
    pub bytes: u64,
}

/// A single object store of cache entries keyed by string.
///
/// Implementations handle their own internal concurrency; callers share one
/// handle without extra locking. Absent keys are `Ok(None)` / `Ok(false)`,
/// never errors.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// A short name for logs, e.g. "file" or "memory".
    fn name(&self) -> &'static str;

    /// Read the entry stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Write `entry` under `entry.key`, replacing any prior entry.
    async fn put(&self, entry: &StoredEntry) -> Result<()>;

    /// Remove the entry under `key`. Returns whether one was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Every key currently stored.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Keys that start with `prefix`.
    ///
    /// Defaults to a full scan of [`KvStore::keys`]; stores with an ordered
    /// index should override it.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = self.keys().await?;
        keys.retain(|key| key.starts_with(prefix));
        Ok(keys)
    }

    /// Remove every entry. Returns how many were removed.
    async fn clear(&self) -> Result<u64>;

    /// Current size of the store.
    async fn usage(&self) -> Result<StoreUsage>;
}

/// Something that can open (or create) a [`KvStore`].
///
/// Opening runs whatever upgrade the backend needs to make the store exist.
#[async_trait]
pub trait OpenStore: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn KvStore>>;
}

// In-memory cache store.
// Sorted map behind an async lock; clones share the same contents.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CacheError, Result};

use super::backend::{KvStore, OpenStore, StoreUsage};
use super::entry::StoredEntry;

/// Non-persistent store for tests and embedders that do not want disk state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, StoredEntry>>>,
    quota_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the total serialized size of held entries.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }
}

fn entry_size(entry: &StoredEntry) -> Result<u64> {
    Ok(serde_json::to_vec(entry)?.len() as u64)
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: &StoredEntry) -> Result<()> {
        let mut entries = self.entries.write().await;

        if let Some(quota) = self.quota_bytes {
            let mut used = 0;
            for (key, existing) in entries.iter() {
                if *key != entry.key {
                    used += entry_size(existing)?;
                }
            }
            if used + entry_size(entry)? > quota {
                return Err(CacheError::QuotaExceeded {
                    key: entry.key.clone(),
                });
            }
        }

        entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn usage(&self) -> Result<StoreUsage> {
        let entries = self.entries.read().await;
        let mut usage = StoreUsage {
            entries: entries.len() as u64,
            bytes: 0,
        };
        for entry in entries.values() {
            usage.bytes += entry_size(entry)?;
        }
        Ok(usage)
    }
}

#[async_trait]
impl OpenStore for MemoryStore {
    async fn open(&self) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::new(self.clone()))
    }
}

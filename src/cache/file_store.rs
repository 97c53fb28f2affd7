// On-disk cache store.
// One JSON file per entry inside a versioned database directory, written atomically.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{CacheError, Result};

use super::backend::{KvStore, OpenStore, StoreUsage};
use super::entry::StoredEntry;
use super::paths::{EntryName, entry_path, manifest_path, parse_entry_file_name, store_dir};

/// Database manifest kept next to the store directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub stores: Vec<String>,
}

/// A versioned on-disk database holding a single object store.
#[derive(Debug, Clone)]
pub struct FileDatabase {
    root: PathBuf,
    name: String,
    version: u32,
    store: String,
    quota_bytes: Option<u64>,
}

impl FileDatabase {
    pub fn new(
        root: impl Into<PathBuf>,
        name: impl Into<String>,
        version: u32,
        store: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
            version,
            store: store.into(),
            quota_bytes: None,
        }
    }

    /// Cap the total bytes of entry files. Writes past the cap fail with
    /// [`CacheError::QuotaExceeded`].
    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    /// Directory that holds the entry files.
    pub fn store_dir(&self) -> PathBuf {
        store_dir(&self.root, &self.name, &self.store)
    }

    async fn read_manifest(&self) -> Result<Option<Manifest>> {
        let path = manifest_path(&self.root, &self.name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Bring the database to `self.version`. Only makes sure the object store
    /// exists; existing entries are left as they are.
    async fn upgrade(&self, current: Option<Manifest>) -> Result<()> {
        let mut manifest = current.unwrap_or_default();
        let from = manifest.version;

        fs::create_dir_all(self.store_dir()).await?;
        if !manifest.stores.contains(&self.store) {
            manifest.stores.push(self.store.clone());
        }
        manifest.version = self.version;

        let json = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&manifest_path(&self.root, &self.name), &json, 0).await?;

        info!(
            database = %self.name,
            store = %self.store,
            from,
            to = self.version,
            "Upgraded cache database"
        );
        Ok(())
    }

    async fn open_store(&self) -> Result<FileStore> {
        let manifest = self.read_manifest().await?;

        match &manifest {
            Some(m) if m.version > self.version => {
                return Err(CacheError::Unavailable(format!(
                    "database {} is at version {}, newer than requested {}",
                    self.name, m.version, self.version
                )));
            }
            Some(m) if m.version == self.version && m.stores.contains(&self.store) => {}
            _ => self.upgrade(manifest).await?,
        }

        Ok(FileStore {
            dir: self.store_dir(),
            quota_bytes: self.quota_bytes,
            temp_counter: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl OpenStore for FileDatabase {
    async fn open(&self) -> Result<Arc<dyn KvStore>> {
        match self.open_store().await {
            Ok(store) => {
                debug!(dir = %store.dir.display(), "Opened file cache store");
                Ok(Arc::new(store))
            }
            Err(e @ CacheError::Unavailable(_)) => Err(e),
            Err(e) => Err(CacheError::Unavailable(format!(
                "failed to open database {} at {}: {}",
                self.name,
                self.root.display(),
                e
            ))),
        }
    }
}

/// Entry files of one object store.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    quota_bytes: Option<u64>,
    temp_counter: AtomicU64,
}

impl FileStore {
    /// Every (key, path) pair in the store directory.
    async fn entry_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let path = item.path();
            match parse_entry_file_name(name) {
                Some(EntryName::Key(key)) => files.push((key, path)),
                Some(EntryName::Hashed) => match self.hashed_key(&path).await {
                    Some(key) => files.push((key, path)),
                    None => debug!(file = name, "Skipping unreadable hashed cache entry"),
                },
                None => debug!(file = name, "Skipping non-entry file in cache store"),
            }
        }
        Ok(files)
    }

    /// Key of a hashed entry file, taken from its body. The key must hash
    /// back to the same path.
    async fn hashed_key(&self, path: &Path) -> Option<String> {
        let bytes = fs::read(path).await.ok()?;
        let entry: StoredEntry = serde_json::from_slice(&bytes).ok()?;
        (entry_path(&self.dir, &entry.key) == path).then_some(entry.key)
    }

    async fn check_quota(&self, path: &Path, key: &str, new_len: u64) -> Result<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let used = self.usage().await?.bytes;
        let replaced = file_len(path).await?;
        if used.saturating_sub(replaced) + new_len > quota {
            return Err(CacheError::QuotaExceeded {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        match fs::read(entry_path(&self.dir, key)).await {
            Ok(bytes) => {
                let entry: StoredEntry = serde_json::from_slice(&bytes)?;
                if entry.key != key {
                    debug!(key, stored = %entry.key, "Cache file holds a different key");
                    return Ok(None);
                }
                Ok(Some(entry))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, entry: &StoredEntry) -> Result<()> {
        let path = entry_path(&self.dir, &entry.key);
        let json = serde_json::to_vec_pretty(entry)?;
        self.check_quota(&path, &entry.key, json.len() as u64)
            .await?;

        fs::create_dir_all(&self.dir).await?;
        let temp_id = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        write_atomic(&path, &json, temp_id)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::StorageFull | io::ErrorKind::FileTooLarge => {
                    CacheError::QuotaExceeded {
                        key: entry.key.clone(),
                    }
                }
                _ => CacheError::Io(e),
            })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(entry_path(&self.dir, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .entry_files()
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    async fn clear(&self) -> Result<u64> {
        let mut removed = 0;
        for (_, path) in self.entry_files().await? {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    async fn usage(&self) -> Result<StoreUsage> {
        let mut usage = StoreUsage::default();
        for (_, path) in self.entry_files().await? {
            usage.entries += 1;
            usage.bytes += file_len(&path).await?;
        }
        Ok(usage)
    }
}

/// Size of a file, or 0 if it does not exist.
async fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Write via a temp file in the same directory, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8], temp_id: u64) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("entry");
    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        temp_id
    ));

    let result: io::Result<()> = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheEntry;
    use crate::cache::paths::encode_key;
    use serde_json::json;
    use tempfile::TempDir;

    fn database(dir: &TempDir) -> FileDatabase {
        FileDatabase::new(dir.path(), "gym-cache", 1, "responses")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = database(&temp_dir).open().await.unwrap();

        let entry = CacheEntry::new("clientes:1", json!({"nombre": "Ana"}), 10);
        store.put(&entry).await.unwrap();

        let read = store.get("clientes:1").await.unwrap();
        assert_eq!(read, Some(entry));
        assert_eq!(store.get("clientes:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_writes_manifest_and_store_dir() {
        let temp_dir = TempDir::new().unwrap();
        let db = database(&temp_dir);
        db.open().await.unwrap();

        assert!(db.store_dir().is_dir());
        let manifest = db.read_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.stores, vec!["responses".to_string()]);
    }

    #[tokio::test]
    async fn test_upgrade_keeps_existing_entries() {
        let temp_dir = TempDir::new().unwrap();
        let v1 = database(&temp_dir).open().await.unwrap();
        v1.put(&CacheEntry::new("rutinas:1", json!([1, 2]), 0))
            .await
            .unwrap();

        let v2 = FileDatabase::new(temp_dir.path(), "gym-cache", 2, "responses");
        let store = v2.open().await.unwrap();

        assert_eq!(v2.read_manifest().await.unwrap().unwrap().version, 2);
        assert!(store.get("rutinas:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_older_version_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        FileDatabase::new(temp_dir.path(), "gym-cache", 3, "responses")
            .open()
            .await
            .unwrap();

        let err = database(&temp_dir).open().await.err().unwrap();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_open_fails_when_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("not-a-dir");
        std::fs::write(&root, b"x").unwrap();

        let err = FileDatabase::new(&root, "gym-cache", 1, "responses")
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let temp_dir = TempDir::new().unwrap();
        let store = database(&temp_dir).open().await.unwrap();
        store
            .put(&CacheEntry::new("k", json!(1), 0))
            .await
            .unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_round_trip_through_file_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = database(&temp_dir).open().await.unwrap();
        for key in ["clientes:1", "clientes_1", "otros:clientes:3"] {
            store
                .put(&CacheEntry::new(key, json!(null), 0))
                .await
                .unwrap();
        }

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["clientes:1", "clientes_1", "otros:clientes:3"]);

        let prefixed = store.keys_with_prefix("clientes:").await.unwrap();
        assert_eq!(prefixed, vec!["clientes:1"]);
    }

    #[tokio::test]
    async fn test_stray_files_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let db = database(&temp_dir);
        let store = db.open().await.unwrap();
        std::fs::write(db.store_dir().join(".leftover.tmp"), b"junk").unwrap();

        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(store.clear().await.unwrap(), 0);
        assert!(db.store_dir().join(".leftover.tmp").exists());
    }

    #[tokio::test]
    async fn test_clear_and_usage() {
        let temp_dir = TempDir::new().unwrap();
        let store = database(&temp_dir).open().await.unwrap();
        store.put(&CacheEntry::new("a", json!("x"), 0)).await.unwrap();
        store.put(&CacheEntry::new("b", json!("y"), 0)).await.unwrap();

        let usage = store.usage().await.unwrap();
        assert_eq!(usage.entries, 2);
        assert!(usage.bytes > 0);

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.usage().await.unwrap(), StoreUsage::default());
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_write() {
        let temp_dir = TempDir::new().unwrap();
        let store = database(&temp_dir)
            .with_quota(Some(200))
            .open()
            .await
            .unwrap();

        store.put(&CacheEntry::new("a", json!("x"), 0)).await.unwrap();
        let big = CacheEntry::new("b", json!("y".repeat(500)), 0);
        let err = store.put(&big).await.err().unwrap();

        assert!(err.is_quota_exceeded());
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_within_quota_counts_replaced_file() {
        let temp_dir = TempDir::new().unwrap();
        let entry = CacheEntry::new("a", json!("x".repeat(50)), 0);
        let size = serde_json::to_vec_pretty(&entry).unwrap().len() as u64;
        let store = database(&temp_dir)
            .with_quota(Some(size + 10))
            .open()
            .await
            .unwrap();

        store.put(&entry).await.unwrap();
        // Replacing the same key must not count the old file twice.
        store.put(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_sees_persisted_entries() {
        let temp_dir = TempDir::new().unwrap();
        database(&temp_dir)
            .open()
            .await
            .unwrap()
            .put(&CacheEntry::new("ejercicios:activos", json!([1, 2, 3]), 99))
            .await
            .unwrap();

        let reopened = database(&temp_dir).open().await.unwrap();
        let entry = reopened.get("ejercicios:activos").await.unwrap().unwrap();
        assert_eq!(entry.payload, json!([1, 2, 3]));
        assert_eq!(entry.written_at, 99);
    }

    #[test]
    fn test_temp_names_do_not_look_like_entries() {
        let name = format!(".{}.json.1.0.tmp", encode_key("a:b"));
        assert_eq!(parse_entry_file_name(&name), None);
    }

    #[tokio::test]
    async fn test_file_holding_another_key_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let db = database(&temp_dir);
        let store = db.open().await.unwrap();

        // What a case-folding filesystem would hand back for "clientes:ana".
        let other = CacheEntry::new("clientes:Ana", json!({"nombre": "Ana"}), 0);
        std::fs::write(
            entry_path(&db.store_dir(), "clientes:ana"),
            serde_json::to_vec(&other).unwrap(),
        )
        .unwrap();

        assert_eq!(store.get("clientes:ana").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_differing_in_case_get_separate_files() {
        let temp_dir = TempDir::new().unwrap();
        let db = database(&temp_dir);
        let store = db.open().await.unwrap();
        store
            .put(&CacheEntry::new("clientes:Ana", json!(1), 0))
            .await
            .unwrap();
        store
            .put(&CacheEntry::new("clientes:ana", json!(2), 0))
            .await
            .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(db.store_dir())
            .unwrap()
            .map(|item| item.unwrap().file_name().to_string_lossy().to_lowercase())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 2);
        assert_eq!(store.get("clientes:Ana").await.unwrap().unwrap().payload, json!(1));
        assert_eq!(store.get("clientes:ana").await.unwrap().unwrap().payload, json!(2));
    }

    #[tokio::test]
    async fn test_foreign_file_names_are_not_listed() {
        let temp_dir = TempDir::new().unwrap();
        let db = database(&temp_dir);
        let store = db.open().await.unwrap();
        store
            .put(&CacheEntry::new("clientes:1", json!(1), 0))
            .await
            .unwrap();
        let stray = CacheEntry::new("clientes:1", json!("stray"), 0);
        std::fs::write(
            db.store_dir().join("clientes:1.json"),
            serde_json::to_vec(&stray).unwrap(),
        )
        .unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["clientes:1"]);
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.keys().await.unwrap().is_empty());
        assert!(db.store_dir().join("clientes:1.json").exists());
    }

    #[tokio::test]
    async fn test_long_key_lives_under_a_hashed_name() {
        let temp_dir = TempDir::new().unwrap();
        let db = database(&temp_dir);
        let store = db.open().await.unwrap();
        let key = format!("rutinas:{}", "semana/".repeat(150));
        store
            .put(&CacheEntry::new(key.as_str(), json!([1]), 0))
            .await
            .unwrap();

        let path = entry_path(&db.store_dir(), &key);
        assert!(path.exists());
        assert!(path.file_name().unwrap().len() < 255);
        assert_eq!(store.keys().await.unwrap(), vec![key.clone()]);
        assert_eq!(store.get(&key).await.unwrap().unwrap().payload, json!([1]));
        assert!(store.delete(&key).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_hashed_file_with_foreign_body_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let db = database(&temp_dir);
        let store = db.open().await.unwrap();
        let key = "k".repeat(400);
        let path = entry_path(&db.store_dir(), &key);
        let wrong = CacheEntry::new("clientes:1", json!(1), 0);
        std::fs::write(&path, serde_json::to_vec(&wrong).unwrap()).unwrap();

        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}

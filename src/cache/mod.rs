// Cache module for local response caching.
// Stores remote query results on disk with read-time TTLs and prefix invalidation.

pub mod backend;
pub mod clock;
pub mod entry;
pub mod file_store;
pub mod keys;
pub mod local;
pub mod memory_store;
pub mod paths;

pub use backend::{KvStore, OpenStore, StoreUsage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, SCHEMA_VERSION, StoredEntry};
pub use file_store::{FileDatabase, FileStore};
pub use keys::Resource;
pub use local::{CacheStats, DEFAULT_TTL, LocalCache, Lookup};
pub use memory_store::MemoryStore;

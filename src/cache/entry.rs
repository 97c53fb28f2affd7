// Cache entry model.
// A payload stamped with its write time; freshness is judged by the reader's TTL.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tag recorded with every entry. Written but never compared on read.
pub const SCHEMA_VERSION: u32 = 1;

/// Entry as persisted by a store, with the payload kept as raw JSON.
pub type StoredEntry = CacheEntry<serde_json::Value>;

/// Wrapper for cached data with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Caller-defined key, kept so stores can enumerate without decoding paths.
    pub key: String,
    /// The cached data.
    pub payload: T,
    /// When the data was written, in milliseconds since the Unix epoch.
    pub written_at: i64,
    /// Schema tag at write time.
    pub schema_version: u32,
}

impl<T> CacheEntry<T> {
    /// Create a new entry written at `written_at`.
    pub fn new(key: impl Into<String>, payload: T, written_at: i64) -> Self {
        Self {
            key: key.into(),
            payload,
            written_at,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Milliseconds elapsed between the write and `now`.
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.written_at)
    }

    /// Check if this entry has expired for a reader using `ttl`.
    ///
    /// The boundary is inclusive: an entry read exactly `ttl` after its write
    /// is still valid.
    pub fn is_expired(&self, ttl: Duration, now: i64) -> bool {
        self.age_millis(now) > ttl_millis(ttl)
    }

    /// Check if this entry is still valid for a reader using `ttl`.
    pub fn is_valid(&self, ttl: Duration, now: i64) -> bool {
        !self.is_expired(ttl, now)
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

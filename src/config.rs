// Cache configuration.
// Defaults, an optional JSON config file, and environment overrides.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::paths;
use crate::error::{CacheError, Result};

pub const ENV_DIR: &str = "GYMCACHE_DIR";
pub const ENV_DEFAULT_TTL_MS: &str = "GYMCACHE_DEFAULT_TTL_MS";
pub const ENV_QUOTA_BYTES: &str = "GYMCACHE_QUOTA_BYTES";

/// Settings for the on-disk cache database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the database. Defaults to the platform cache dir.
    pub root: Option<PathBuf>,
    /// Database name (a directory under `root`).
    pub database: String,
    /// Database version; raising it runs the upgrade hook on next open.
    pub version: u32,
    /// Object store name (a directory under the database).
    pub store: String,
    /// TTL applied by reads that do not pass one, in milliseconds.
    pub default_ttl_ms: u64,
    /// Cap on total entry bytes. None leaves it to the filesystem.
    pub quota_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            database: "gym-cache".to_string(),
            version: 1,
            store: "responses".to_string(),
            default_ttl_ms: 5 * 60 * 1000,
            quota_bytes: None,
        }
    }
}

impl CacheConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: CacheConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config file at `path` if it exists, else use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => match Self::load(path) {
                Err(CacheError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    Ok(Self::default())
                }
                other => other,
            },
            None => Ok(Self::default()),
        }
    }

    /// Apply `GYMCACHE_*` environment overrides.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|name| env::var(name).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = var(ENV_DIR) {
            self.root = Some(PathBuf::from(dir));
        }
        if let Some(ttl) = var(ENV_DEFAULT_TTL_MS) {
            self.default_ttl_ms = parse_number(ENV_DEFAULT_TTL_MS, &ttl)?;
        }
        if let Some(quota) = var(ENV_QUOTA_BYTES) {
            self.quota_bytes = Some(parse_number(ENV_QUOTA_BYTES, &quota)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(CacheError::Config("database name is empty".to_string()));
        }
        if self.store.is_empty() {
            return Err(CacheError::Config("store name is empty".to_string()));
        }
        if self.version == 0 {
            return Err(CacheError::Config("version must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The configured root, or the platform cache directory.
    pub fn resolve_root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => paths::cache_dir().ok_or_else(|| {
                CacheError::Config("could not determine a cache directory".to_string())
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        CacheError::Config(format!("{} must be a whole number, got {:?}", name, value))
    })
}

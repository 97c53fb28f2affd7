// gymcache: local response cache for the gym management client.
// Data services read through it before hitting the remote backend and invalidate it after writes.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{LocalCache, Lookup, Resource};
pub use config::CacheConfig;
pub use error::{CacheError, Result};

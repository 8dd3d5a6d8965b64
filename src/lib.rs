//! Tier Cache - A two-tier object cache
//!
//! Keeps a bounded first level in memory and spills evicted entries into an
//! optional persisted second level (a cache directory or a preferences-style
//! registry), with per-entry TTL expiry in both tiers.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod tasks;

pub use cache::{CacheEntry, CacheKey, CacheStats, CacheStore, EntryMetadata, Ttl};
pub use config::{CacheConfig, CleanupStrategy, PersistStrategy, SecondLevelTarget};
pub use error::{CacheError, Result};
pub use logging::init_tracing;
pub use persistence::{cache_directory, clear_all_cached_files, clear_all_cached_files_in};
pub use tasks::spawn_expiry_sweeper;

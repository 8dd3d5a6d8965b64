//! Persistence Module
//!
//! Second-level storage: the registry capability, its two backends, the value
//! codec and the gateway translating cache entries into registry records.

mod codec;
mod directory;
mod gateway;
mod preferences;
mod registry;

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::SecondLevelTarget;

// Re-export public types
pub use codec::{JsonCodec, MemoryOnlyCodec, ValueCodec};
pub use directory::{DirectoryRegistry, ENTRY_EXTENSION, KEY_EXTENSION};
pub use gateway::{LoadOutcome, PersistenceGateway, SecondLevelFile};
pub use preferences::PreferencesRegistry;
pub use registry::{Registry, RegistryRecord, RegistryResult};

// == Public Constants ==
/// Directory name used below the platform cache and preference directories
pub const APP_DIR_NAME: &str = "tier_cache";

/// Overrides the cache directory location when set
pub const CACHE_DIR_ENV: &str = "TIER_CACHE_DIR";

// == Cache Directory ==
/// Process-wide root of the `CacheFolder` backend, independent of any store.
///
/// `$TIER_CACHE_DIR` when set, otherwise `tier_cache` below the platform
/// cache directory (falling back to the temp directory).
pub fn cache_directory() -> PathBuf {
    resolve_cache_directory(env::var_os(CACHE_DIR_ENV))
}

fn resolve_cache_directory(override_dir: Option<OsString>) -> PathBuf {
    if let Some(dir) = override_dir.filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs_next::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Default document of the `Preferences` backend, below the platform config
/// directory.
pub fn preferences_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(env::temp_dir)
        .join(APP_DIR_NAME)
        .join("preferences.json")
}

// == Clear All Cached Files ==
/// Removes everything below [`cache_directory`], across every store.
///
/// Intended for global teardown; stores that are still alive keep their
/// first-level entries.
pub fn clear_all_cached_files() -> RegistryResult<()> {
    clear_all_cached_files_in(cache_directory())
}

/// Removes everything below `root`, the cache directory of a `CacheFolder`
/// store configured with an explicit location.
pub fn clear_all_cached_files_in(root: impl Into<PathBuf>) -> RegistryResult<()> {
    let registry = DirectoryRegistry::new(root);
    registry.clear_all()?;
    info!("Cleared all cached files below {}", registry.root().display());
    Ok(())
}

/// Opens the backend selected by `target`.
pub(crate) fn open_registry(
    target: SecondLevelTarget,
    cache_directory: &Path,
    preferences_path: &Path,
) -> RegistryResult<Arc<dyn Registry>> {
    let registry: Arc<dyn Registry> = match target {
        SecondLevelTarget::CacheFolder => Arc::new(DirectoryRegistry::new(cache_directory)),
        SecondLevelTarget::Preferences => PreferencesRegistry::shared(preferences_path)?,
    };
    Ok(registry)
}

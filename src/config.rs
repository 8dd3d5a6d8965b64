//! Configuration Module
//!
//! Handles building, loading and validating cache store configuration.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::persistence::{cache_directory, preferences_path};

/// Maximum allowed store name length in bytes
pub const MAX_NAME_LENGTH: usize = 128;

// == Cleanup Strategy ==
/// Ranking used to pick first-level entries for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStrategy {
    /// Least recently read first
    #[default]
    LastAccessed,
    /// Oldest insert first
    LastAdded,
    /// Soonest to expire first
    RemainingTtl,
    /// Least frequently read first
    AccessCount,
}

// == Persist Strategy ==
/// Which events write to the second level.
///
/// Cleanup victims are persisted under both strategies, whether the cleanup
/// came from an insert overflow or an explicit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStrategy {
    /// Cleanup victims, oversized inserts, and access metadata of
    /// second-level hits
    #[default]
    OnInsertAndClean,
    /// Cleanup victims and oversized inserts only; second-level hits are not
    /// written back
    OnCleanOnly,
}

// == Second Level Target ==
/// Backend used for the second level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondLevelTarget {
    /// One file per entry below the cache directory
    #[default]
    CacheFolder,
    /// Flat key-value document, like an application preferences store
    Preferences,
}

macro_rules! string_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = CacheError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CacheError::InvalidConfig(format!(
                        "unknown {}: {}",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(CleanupStrategy {
    LastAccessed => "last_accessed",
    LastAdded => "last_added",
    RemainingTtl => "remaining_ttl",
    AccessCount => "access_count",
});

string_enum!(PersistStrategy {
    OnInsertAndClean => "on_insert_and_clean",
    OnCleanOnly => "on_clean_only",
});

string_enum!(SecondLevelTarget {
    CacheFolder => "cache_folder",
    Preferences => "preferences",
});

// == Cache Config ==
/// Cache store configuration parameters.
///
/// Every value has a sensible default; `name` is the persistence namespace
/// and must be unique per logical cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace for persisted data
    pub name: String,
    pub cleanup_strategy: CleanupStrategy,
    pub persist_strategy: PersistStrategy,
    pub second_level_target: SecondLevelTarget,
    /// Maximum number of first-level entries
    pub first_level_limit: usize,
    /// Encoded values above this many bytes bypass the first level
    pub first_level_entry_size_limit: Option<usize>,
    /// Maximum number of second-level entries; 0 disables the second level
    pub second_level_limit: usize,
    /// TTL applied when a caller does not pick one
    pub default_time_to_life: Duration,
    /// Copy second-level hits back into the first level
    pub promote_on_second_level_hit: bool,
    /// Flush the first level when the store is dropped
    pub persist_on_drop: bool,
    /// Root of the `CacheFolder` backend
    pub cache_directory: PathBuf,
    /// Document backing the `Preferences` backend
    pub preferences_path: PathBuf,
}

impl CacheConfig {
    /// Creates a configuration with defaults for the given store name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Creates a configuration by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `FIRST_LEVEL_LIMIT` - Maximum first-level entries (default: 1000)
    /// - `FIRST_LEVEL_ENTRY_SIZE_LIMIT` - Size routing threshold in bytes (default: unset)
    /// - `SECOND_LEVEL_LIMIT` - Maximum second-level entries (default: 0)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CLEANUP_STRATEGY` - e.g. `last_accessed` (default)
    /// - `PERSIST_STRATEGY` - e.g. `on_insert_and_clean` (default)
    /// - `SECOND_LEVEL_TARGET` - `cache_folder` (default) or `preferences`
    /// - `PROMOTE_ON_HIT` - `true`/`false` (default: false)
    /// - `PERSIST_ON_DROP` - `true`/`false` (default: false)
    pub fn from_env(name: impl Into<String>) -> Self {
        let defaults = Self::new(name);
        Self {
            first_level_limit: env_parse("FIRST_LEVEL_LIMIT").unwrap_or(defaults.first_level_limit),
            first_level_entry_size_limit: env_parse("FIRST_LEVEL_ENTRY_SIZE_LIMIT")
                .or(defaults.first_level_entry_size_limit),
            second_level_limit: env_parse("SECOND_LEVEL_LIMIT")
                .unwrap_or(defaults.second_level_limit),
            default_time_to_life: env_parse("DEFAULT_TTL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_time_to_life),
            cleanup_strategy: env_parse("CLEANUP_STRATEGY").unwrap_or(defaults.cleanup_strategy),
            persist_strategy: env_parse("PERSIST_STRATEGY").unwrap_or(defaults.persist_strategy),
            second_level_target: env_parse("SECOND_LEVEL_TARGET")
                .unwrap_or(defaults.second_level_target),
            promote_on_second_level_hit: env_parse("PROMOTE_ON_HIT")
                .unwrap_or(defaults.promote_on_second_level_hit),
            persist_on_drop: env_parse("PERSIST_ON_DROP").unwrap_or(defaults.persist_on_drop),
            ..defaults
        }
    }

    pub fn with_first_level_limit(mut self, limit: usize) -> Self {
        self.first_level_limit = limit;
        self
    }

    pub fn with_first_level_entry_size_limit(mut self, bytes: usize) -> Self {
        self.first_level_entry_size_limit = Some(bytes);
        self
    }

    pub fn with_second_level_limit(mut self, limit: usize) -> Self {
        self.second_level_limit = limit;
        self
    }

    pub fn with_default_time_to_life(mut self, ttl: Duration) -> Self {
        self.default_time_to_life = ttl;
        self
    }

    pub fn with_cleanup_strategy(mut self, strategy: CleanupStrategy) -> Self {
        self.cleanup_strategy = strategy;
        self
    }

    pub fn with_persist_strategy(mut self, strategy: PersistStrategy) -> Self {
        self.persist_strategy = strategy;
        self
    }

    pub fn with_second_level_target(mut self, target: SecondLevelTarget) -> Self {
        self.second_level_target = target;
        self
    }

    pub fn with_promote_on_second_level_hit(mut self, promote: bool) -> Self {
        self.promote_on_second_level_hit = promote;
        self
    }

    pub fn with_persist_on_drop(mut self, persist: bool) -> Self {
        self.persist_on_drop = persist;
        self
    }

    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences_path = path.into();
        self
    }

    // == Validate ==
    /// Checks the values that cannot be fixed up later.
    ///
    /// The name doubles as a directory name and registry prefix, so it is
    /// restricted to `[A-Za-z0-9_.-]`.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty() || name == "." || name == ".." {
            return Err(CacheError::InvalidNamespace(format!("{:?}", name)));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(CacheError::InvalidNamespace(format!(
                "name exceeds maximum length of {} bytes",
                MAX_NAME_LENGTH
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(CacheError::InvalidNamespace(format!(
                "{:?} contains {:?}",
                name, bad
            )));
        }
        if self.first_level_limit == 0 {
            return Err(CacheError::InvalidConfig(
                "first_level_limit must be greater than zero".to_string(),
            ));
        }
        if self.default_time_to_life.is_zero() {
            return Err(CacheError::InvalidConfig(
                "default_time_to_life must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            cleanup_strategy: CleanupStrategy::default(),
            persist_strategy: PersistStrategy::default(),
            second_level_target: SecondLevelTarget::default(),
            first_level_limit: 1000,
            first_level_entry_size_limit: None,
            second_level_limit: 0,
            default_time_to_life: Duration::from_secs(300),
            promote_on_second_level_hit: false,
            persist_on_drop: false,
            cache_directory: cache_directory(),
            preferences_path: preferences_path(),
        }
    }
}

fn env_parse<T: FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.parse().ok())
}

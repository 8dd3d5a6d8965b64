//! Cache Module
//!
//! Provides the two-tier cache store: TTL-checked entries in a bounded first
//! level, evicted by a configurable strategy into an optional second level.

mod entry;
mod policy;
mod stats;
mod store;


use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

// Re-export public types
pub use entry::{current_time, CacheEntry, EntryMetadata, Ttl};
pub use policy::select_victims;
pub use stats::CacheStats;
pub use store::CacheStore;

// == Cache Key ==
/// Requirements on cache keys: map key in the first level, JSON text as the
/// registry key in the second level.
pub trait CacheKey:
    Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheKey for T where
    T: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

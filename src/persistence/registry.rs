//! Registry Module
//!
//! The byte-oriented persistent key-value capability backing the second level.

use serde::Serialize;

use crate::error::RegistryError;

/// Convenience Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

// == Registry Record ==
/// Descriptor of one persisted record: its key and stored size, never the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryRecord {
    pub key: String,
    pub size: u64,
}

// == Registry Trait ==
/// A persistent key-value registry partitioned into namespaces.
///
/// Deletes are idempotent: removing a missing key or clearing an empty
/// namespace succeeds.
pub trait Registry: Send + Sync {
    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> RegistryResult<()>;

    fn read(&self, namespace: &str, key: &str) -> RegistryResult<Option<Vec<u8>>>;

    fn delete(&self, namespace: &str, key: &str) -> RegistryResult<()>;

    fn enumerate(&self, namespace: &str) -> RegistryResult<Vec<RegistryRecord>>;

    /// Removes every record of one namespace.
    fn clear(&self, namespace: &str) -> RegistryResult<()>;

    /// Removes every record of every namespace.
    fn clear_all(&self) -> RegistryResult<()>;
}

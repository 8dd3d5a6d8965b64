//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.
//!
//! Only construction-time problems surface through [`CacheError`]. Failures on
//! the persistence path ([`PersistError`], [`RegistryError`], [`CodecError`])
//! are absorbed and logged by the store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Errors reported to callers of the public cache API.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Store name cannot be used as a persistence namespace
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Second-level backend could not be opened
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

// == Registry Error Enum ==
/// Failure of the persistent key-value registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Filesystem access failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored data could not be interpreted
    #[error("Corrupt registry data: {0}")]
    Corrupt(String),
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RegistryError::Io {
            path: path.into(),
            source,
        }
    }
}

// == Codec Error Enum ==
/// Failure to convert a value to or from its byte form.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Value's concrete type cannot be encoded
    #[error("Value not serializable: {0}")]
    NotSerializable(String),

    /// Bytes do not decode to a value
    #[error("Malformed value bytes: {0}")]
    Malformed(String),
}

// == Persist Error Enum ==
/// Failure of a single tier transition.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Value not serializable: {0}")]
    NotSerializable(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Second level is switched off
    #[error("Second level disabled")]
    Disabled,
}

impl From<CodecError> for PersistError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::NotSerializable(msg) | CodecError::Malformed(msg) => {
                PersistError::NotSerializable(msg)
            }
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

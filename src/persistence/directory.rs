//! Directory Registry Module
//!
//! One file per entry below `<root>/<namespace>/`, named by the SHA-256 of
//! its registry key, with the key itself kept in a sidecar file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::RegistryError;
use crate::persistence::{Registry, RegistryRecord, RegistryResult};

/// Extension of entry files
pub const ENTRY_EXTENSION: &str = "entry";

/// Extension of the sidecar holding an entry's registry key
pub const KEY_EXTENSION: &str = "key";

const TEMP_EXTENSION: &str = "tmp";

// == Directory Registry ==
/// Filesystem backend: file names are the hex SHA-256 of the registry key,
/// so every key maps to a short portable name whatever its length.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    /// Creates a registry rooted at `root`. Nothing is created on disk until
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{}", file_stem(key), ENTRY_EXTENSION))
    }
}

fn file_stem(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Writes then renames so readers never observe a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> RegistryResult<()> {
    let temp = path.with_extension(TEMP_EXTENSION);
    fs::write(&temp, bytes).map_err(|e| RegistryError::io(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| RegistryError::io(path, e))
}

/// Key recorded next to `entry_path`, if it belongs to that file.
fn read_sidecar_key(entry_path: &Path) -> Option<String> {
    let raw = fs::read(entry_path.with_extension(KEY_EXTENSION)).ok()?;
    let key = String::from_utf8(raw).ok()?;
    let stem = entry_path.file_stem()?.to_str()?;
    (stem == file_stem(&key)).then_some(key)
}

fn remove_file(path: &Path) -> RegistryResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(RegistryError::io(path, e)),
        _ => Ok(()),
    }
}

impl Registry for DirectoryRegistry {
    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> RegistryResult<()> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).map_err(|e| RegistryError::io(&dir, e))?;

        // Key first: an entry file without its sidecar is never listed
        let path = self.entry_path(namespace, key);
        write_atomic(&path.with_extension(KEY_EXTENSION), key.as_bytes())?;
        write_atomic(&path, bytes)
    }

    fn read(&self, namespace: &str, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        let path = self.entry_path(namespace, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::io(path, e)),
        }
    }

    fn delete(&self, namespace: &str, key: &str) -> RegistryResult<()> {
        let path = self.entry_path(namespace, key);
        remove_file(&path)?;
        remove_file(&path.with_extension(KEY_EXTENSION))
    }

    fn enumerate(&self, namespace: &str) -> RegistryResult<Vec<RegistryRecord>> {
        let dir = self.namespace_dir(namespace);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::io(dir, e)),
        };

        let mut records = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| RegistryError::io(&dir, e))?;
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(key) = read_sidecar_key(&path) else {
                debug!("Skipping foreign file in cache directory: {}", path.display());
                continue;
            };
            let metadata = dir_entry
                .metadata()
                .map_err(|e| RegistryError::io(&path, e))?;
            if metadata.is_file() {
                records.push(RegistryRecord {
                    key,
                    size: metadata.len(),
                });
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    fn clear(&self, namespace: &str) -> RegistryResult<()> {
        remove_tree(&self.namespace_dir(namespace))
    }

    fn clear_all(&self) -> RegistryResult<()> {
        remove_tree(&self.root)
    }
}

fn remove_tree(path: &Path) -> RegistryResult<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(RegistryError::io(path, e)),
        _ => Ok(()),
    }
}

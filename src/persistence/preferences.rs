//! Preferences Registry Module
//!
//! A flat key-value document, persisted as one JSON file in the manner of an
//! application preferences store.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::persistence::{Registry, RegistryRecord, RegistryResult};

/// namespace -> key -> hex-encoded bytes
type Document = BTreeMap<String, BTreeMap<String, String>>;

/// Live file-backed registries, one per document path
static SHARED: OnceLock<Mutex<HashMap<PathBuf, Weak<PreferencesRegistry>>>> = OnceLock::new();

// == Preferences Registry ==
/// Keeps the whole document in memory and rewrites the file on every mutation.
///
/// Every mutation re-reads the file first, so namespaces written by other
/// handles on the same document are carried over instead of overwritten.
#[derive(Debug)]
pub struct PreferencesRegistry {
    /// `None` = volatile, never written anywhere
    path: Option<PathBuf>,
    document: Mutex<Document>,
}

impl PreferencesRegistry {
    /// Loads the document at `path`; a missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> RegistryResult<Self> {
        let path = path.into();
        let document = load(&path)?;
        Ok(Self {
            path: Some(path),
            document: Mutex::new(document),
        })
    }

    /// Returns the registry already open on `path` in this process, opening
    /// it when there is none. Stores sharing a document share one handle and
    /// its lock.
    pub fn shared(path: impl Into<PathBuf>) -> RegistryResult<Arc<Self>> {
        let path = path.into();
        let mut shared = SHARED.get_or_init(|| Mutex::new(HashMap::new())).lock();
        if let Some(registry) = shared.get(&path).and_then(Weak::upgrade) {
            return Ok(registry);
        }

        let registry = Arc::new(Self::open(path.clone())?);
        shared.retain(|_, registry| registry.strong_count() > 0);
        shared.insert(path, Arc::downgrade(&registry));
        Ok(registry)
    }

    /// Creates a registry that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            document: Mutex::new(Document::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // == Mutate ==
    /// Applies `change` to a fresh copy of the document, saves it, then
    /// commits it, so a failed save leaves the in-memory state untouched.
    fn mutate<F>(&self, change: F) -> RegistryResult<()>
    where
        F: FnOnce(&mut Document),
    {
        let mut document = self.document.lock();
        let current = match &self.path {
            Some(path) => load(path)?,
            None => document.clone(),
        };
        let mut updated = current.clone();
        change(&mut updated);
        if updated == current {
            *document = current;
            return Ok(());
        }
        self.save(&updated)?;
        *document = updated;
        Ok(())
    }

    fn save(&self, document: &Document) -> RegistryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RegistryError::io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| RegistryError::Corrupt(e.to_string()))?;
        let temp = path.with_extension("tmp");
        fs::write(&temp, bytes).map_err(|e| RegistryError::io(&temp, e))?;
        fs::rename(&temp, path).map_err(|e| RegistryError::io(path, e))
    }
}

/// Reads the document at `path`; a missing file is an empty document.
fn load(path: &Path) -> RegistryResult<Document> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::Corrupt(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
        Err(e) => Err(RegistryError::io(path, e)),
    }
}

impl Registry for PreferencesRegistry {
    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> RegistryResult<()> {
        let encoded = hex::encode(bytes);
        self.mutate(|doc| {
            doc.entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), encoded);
        })
    }

    fn read(&self, namespace: &str, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        let document = self.document.lock();
        document
            .get(namespace)
            .and_then(|records| records.get(key))
            .map(|encoded| {
                hex::decode(encoded)
                    .map_err(|e| RegistryError::Corrupt(format!("{}/{}: {}", namespace, key, e)))
            })
            .transpose()
    }

    fn delete(&self, namespace: &str, key: &str) -> RegistryResult<()> {
        self.mutate(|doc| {
            if let Some(records) = doc.get_mut(namespace) {
                records.remove(key);
                if records.is_empty() {
                    doc.remove(namespace);
                }
            }
        })
    }

    fn enumerate(&self, namespace: &str) -> RegistryResult<Vec<RegistryRecord>> {
        let document = self.document.lock();
        Ok(document
            .get(namespace)
            .map(|records| {
                records
                    .iter()
                    .map(|(key, encoded)| RegistryRecord {
                        key: key.clone(),
                        size: (encoded.len() / 2) as u64,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn clear(&self, namespace: &str) -> RegistryResult<()> {
        self.mutate(|doc| {
            doc.remove(namespace);
        })
    }

    fn clear_all(&self) -> RegistryResult<()> {
        self.mutate(|doc| doc.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_roundtrip() {
        let registry = PreferencesRegistry::in_memory();

        registry.write("ns", "k", b"value").unwrap();
        assert_eq!(registry.read("ns", "k").unwrap(), Some(b"value".to_vec()));
        assert_eq!(registry.read("ns", "missing").unwrap(), None);
        assert_eq!(registry.read("other", "k").unwrap(), None);
    }

    #[test]
    fn test_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prefs").join("preferences.json");

        {
            let registry = PreferencesRegistry::open(&path).unwrap();
            registry.write("ns", "k", b"abc").unwrap();
            registry.write("ns", "j", b"xy").unwrap();
        }

        let reopened = PreferencesRegistry::open(&path).unwrap();
        assert_eq!(reopened.read("ns", "k").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(
            reopened.enumerate("ns").unwrap(),
            vec![
                RegistryRecord { key: "j".to_string(), size: 2 },
                RegistryRecord { key: "k".to_string(), size: 3 },
            ]
        );
    }

    #[test]
    fn test_open_does_not_create_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preferences.json");

        let registry = PreferencesRegistry::open(&path).unwrap();
        registry.delete("ns", "k").unwrap();
        registry.clear("ns").unwrap();

        assert!(!path.exists(), "no-op mutations must not write");
    }

    #[test]
    fn test_corrupt_document_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preferences.json");
        fs::write(&path, b"not json").unwrap();

        let result = PreferencesRegistry::open(&path);
        assert!(matches!(result, Err(RegistryError::Corrupt(_))));
    }

    #[test]
    fn test_clear_scopes() {
        let registry = PreferencesRegistry::in_memory();
        registry.write("one", "k", b"1").unwrap();
        registry.write("two", "k", b"2").unwrap();

        registry.clear("one").unwrap();
        assert!(registry.enumerate("one").unwrap().is_empty());
        assert_eq!(registry.enumerate("two").unwrap().len(), 1);

        registry.clear_all().unwrap();
        assert!(registry.enumerate("two").unwrap().is_empty());
    }

    #[test]
    fn test_separate_handles_keep_each_others_namespaces() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preferences.json");
        let one = PreferencesRegistry::open(&path).unwrap();
        let two = PreferencesRegistry::open(&path).unwrap();

        one.write("one", "k", b"1").unwrap();
        two.write("two", "k", b"2").unwrap();

        let reopened = PreferencesRegistry::open(&path).unwrap();
        assert_eq!(reopened.read("one", "k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reopened.read("two", "k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_shared_returns_live_handle() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preferences.json");

        let first = PreferencesRegistry::shared(&path).unwrap();
        let second = PreferencesRegistry::shared(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        drop(first);
        drop(second);
        let reopened = PreferencesRegistry::shared(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
    }
}

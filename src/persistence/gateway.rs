//! Persistence Gateway Module
//!
//! Moves entries between the first level and a [`Registry`], and keeps the
//! second level within its entry limit.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{select_victims, CacheEntry, CacheKey, EntryMetadata};
use crate::config::CleanupStrategy;
use crate::error::{PersistError, RegistryError};
use crate::persistence::{Registry, RegistryRecord, ValueCodec};

// == Envelope ==
/// Persisted form of an entry: the encoded value plus its access metadata.
#[derive(Serialize, Deserialize)]
struct Envelope<K> {
    key: K,
    #[serde(with = "hex::serde")]
    value: Vec<u8>,
    #[serde(flatten)]
    meta: PersistedMetadata,
}

/// Metadata fields of an envelope. Deserializing a whole envelope into this
/// type skips the key and value.
#[derive(Serialize, Deserialize)]
struct PersistedMetadata {
    added_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    access_count: u64,
    /// `None` = never expires
    time_to_life_ms: Option<u64>,
    sequence: u64,
}

impl From<&EntryMetadata> for PersistedMetadata {
    fn from(meta: &EntryMetadata) -> Self {
        Self {
            added_at: meta.added_at,
            last_accessed_at: meta.last_accessed_at,
            access_count: meta.access_count,
            time_to_life_ms: meta
                .time_to_life
                .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            sequence: meta.sequence,
        }
    }
}

impl From<PersistedMetadata> for EntryMetadata {
    fn from(meta: PersistedMetadata) -> Self {
        Self {
            added_at: meta.added_at,
            last_accessed_at: meta.last_accessed_at,
            access_count: meta.access_count,
            time_to_life: meta.time_to_life_ms.map(Duration::from_millis),
            sequence: meta.sequence,
        }
    }
}

// == Load Outcome ==
/// Result of looking a key up in the second level.
#[derive(Debug)]
pub enum LoadOutcome<K, V> {
    Hit(CacheEntry<K, V>),
    /// Found but past its TTL; the record has been deleted
    Expired,
    Missing,
}

// == Second Level File ==
/// Introspection descriptor of a persisted entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondLevelFile<K> {
    pub key: K,
    /// Stored size in bytes
    pub size: u64,
}

// == Persistence Gateway ==
/// Second-level access for one store namespace.
pub struct PersistenceGateway<K, V> {
    namespace: String,
    registry: Arc<dyn Registry>,
    codec: Arc<dyn ValueCodec<V>>,
    /// Maximum number of persisted entries; 0 disables the second level
    limit: usize,
    cleanup_strategy: CleanupStrategy,
    /// Metadata of persisted records by registry key, synced against the
    /// registry listing before each eviction
    index: Mutex<HashMap<String, EntryMetadata>>,
    _key: PhantomData<fn() -> K>,
}

impl<K: CacheKey, V> PersistenceGateway<K, V> {
    // == Constructor ==
    /// Creates a gateway for `namespace`.
    ///
    /// # Arguments
    /// * `namespace` - Store name isolating this store's records
    /// * `registry` - Backend holding the records
    /// * `codec` - Value encoder
    /// * `limit` - Maximum persisted entries, 0 = disabled
    /// * `cleanup_strategy` - Ranking used when the limit is reached
    pub fn new(
        namespace: impl Into<String>,
        registry: Arc<dyn Registry>,
        codec: Arc<dyn ValueCodec<V>>,
        limit: usize,
        cleanup_strategy: CleanupStrategy,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            registry,
            codec,
            limit,
            cleanup_strategy,
            index: Mutex::new(HashMap::new()),
            _key: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn set_cleanup_strategy(&mut self, strategy: CleanupStrategy) {
        self.cleanup_strategy = strategy;
    }

    pub fn encode_value(&self, value: &V) -> Result<Vec<u8>, PersistError> {
        Ok(self.codec.encode(value)?)
    }

    fn registry_key(key: &K) -> Result<String, PersistError> {
        serde_json::to_string(key).map_err(|e| PersistError::NotSerializable(e.to_string()))
    }

    // == Persist Entry ==
    /// Writes `entry` to the registry, evicting persisted entries first when
    /// the second level is full.
    ///
    /// Fails with `NotSerializable` when the value cannot be encoded; the
    /// caller decides what happens to the entry.
    pub fn persist_entry(
        &self,
        entry: &CacheEntry<K, V>,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        let bytes = self.encode_value(entry.value())?;
        self.persist_encoded(entry, bytes, now)
    }

    /// Like [`persist_entry`](Self::persist_entry) with the value already encoded.
    pub fn persist_encoded(
        &self,
        entry: &CacheEntry<K, V>,
        value: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        if !self.is_enabled() {
            return Err(PersistError::Disabled);
        }
        let registry_key = Self::registry_key(entry.key())?;
        self.make_room(&registry_key, now)?;
        self.write_envelope(&registry_key, entry, value)
    }

    /// Re-writes a persisted entry in place, e.g. after its access metadata
    /// changed. Does not enforce the limit.
    pub fn update_entry(&self, entry: &CacheEntry<K, V>) -> Result<(), PersistError> {
        if !self.is_enabled() {
            return Err(PersistError::Disabled);
        }
        let value = self.encode_value(entry.value())?;
        let registry_key = Self::registry_key(entry.key())?;
        self.write_envelope(&registry_key, entry, value)
    }

    fn write_envelope(
        &self,
        registry_key: &str,
        entry: &CacheEntry<K, V>,
        value: Vec<u8>,
    ) -> Result<(), PersistError> {
        let envelope = Envelope {
            key: entry.key(),
            value,
            meta: PersistedMetadata::from(entry.metadata()),
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| PersistError::NotSerializable(e.to_string()))?;
        self.registry.write(&self.namespace, registry_key, &bytes)?;
        self.index
            .lock()
            .insert(registry_key.to_string(), *entry.metadata());
        Ok(())
    }

    // == Make Room ==
    /// Evicts persisted entries until one more fits under the limit.
    ///
    /// Ranking uses the metadata index; only records missing from it are
    /// read. Unreadable records are dropped first, then the cleanup strategy
    /// ranks the rest. Overwriting `incoming` needs no room.
    fn make_room(&self, incoming: &str, now: DateTime<Utc>) -> Result<(), PersistError> {
        let records = self.registry.enumerate(&self.namespace)?;
        let occupied = records.iter().filter(|r| r.key != incoming).count();
        if occupied < self.limit {
            return Ok(());
        }
        let mut excess = occupied + 1 - self.limit;

        let mut index = self.index.lock();
        let present: HashSet<&str> = records.iter().map(|r| r.key.as_str()).collect();
        index.retain(|key, _| present.contains(key.as_str()));
        index.remove(incoming);

        for record in records.iter().filter(|r| r.key != incoming) {
            if index.contains_key(&record.key) {
                continue;
            }
            match self.read_metadata(&record.key) {
                Ok(Some(meta)) => {
                    index.insert(record.key.clone(), meta);
                }
                Ok(None) => excess = excess.saturating_sub(1),
                Err(e) => {
                    warn!("Dropping unreadable second-level record {}: {}", record.key, e);
                    self.delete_quietly(&record.key);
                    excess = excess.saturating_sub(1);
                }
            }
        }

        let victims = select_victims(
            index.iter().map(|(key, meta)| (key.clone(), meta)),
            excess,
            self.cleanup_strategy,
            now,
        );
        for key in victims {
            debug!("Evicting second-level entry {} from store {}", key, self.namespace);
            self.registry.delete(&self.namespace, &key)?;
            index.remove(&key);
        }
        Ok(())
    }

    fn read_metadata(&self, registry_key: &str) -> Result<Option<EntryMetadata>, RegistryError> {
        let Some(bytes) = self.registry.read(&self.namespace, registry_key)? else {
            return Ok(None);
        };
        let meta: PersistedMetadata = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::Corrupt(format!("{}: {}", registry_key, e)))?;
        Ok(Some(meta.into()))
    }

    fn delete_quietly(&self, registry_key: &str) {
        if let Err(e) = self.registry.delete(&self.namespace, registry_key) {
            warn!("Failed to delete second-level record {}: {}", registry_key, e);
        }
    }

    // == Load Entry ==
    /// Reads an entry back from the registry.
    ///
    /// Expired, corrupt and undecodable records are deleted as part of the read.
    pub fn load_entry(
        &self,
        key: &K,
        now: DateTime<Utc>,
    ) -> Result<LoadOutcome<K, V>, PersistError> {
        if !self.is_enabled() {
            return Ok(LoadOutcome::Missing);
        }
        let registry_key = Self::registry_key(key)?;
        let Some(bytes) = self.registry.read(&self.namespace, &registry_key)? else {
            return Ok(LoadOutcome::Missing);
        };

        let envelope: Envelope<K> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping corrupt second-level record {}: {}", registry_key, e);
                self.delete_quietly(&registry_key);
                return Ok(LoadOutcome::Missing);
            }
        };

        let meta = EntryMetadata::from(envelope.meta);
        if !meta.is_valid(now) {
            debug!("Second-level entry {} expired", registry_key);
            self.registry.delete(&self.namespace, &registry_key)?;
            return Ok(LoadOutcome::Expired);
        }

        match self.codec.decode(&envelope.value) {
            Ok(value) => Ok(LoadOutcome::Hit(CacheEntry::from_parts(envelope.key, value, meta))),
            Err(e) => {
                warn!("Dropping undecodable second-level value {}: {}", registry_key, e);
                self.delete_quietly(&registry_key);
                Ok(LoadOutcome::Missing)
            }
        }
    }

    pub fn remove_entry(&self, key: &K) -> Result<(), PersistError> {
        let registry_key = Self::registry_key(key)?;
        self.registry.delete(&self.namespace, &registry_key)?;
        Ok(())
    }

    /// Removes every persisted entry of this store.
    pub fn clear_all_for_store(&self) -> Result<(), RegistryError> {
        self.registry.clear(&self.namespace)
    }

    /// Removes every persisted entry of every store sharing the registry.
    pub fn clear_all_stores(&self) -> Result<(), RegistryError> {
        self.registry.clear_all()
    }

    pub fn enumerate(&self) -> Result<Vec<RegistryRecord>, RegistryError> {
        self.registry.enumerate(&self.namespace)
    }

    /// Persisted entries with their decoded keys; records whose key does not
    /// parse as `K` are skipped.
    pub fn files(&self) -> Result<Vec<SecondLevelFile<K>>, RegistryError> {
        Ok(self
            .enumerate()?
            .into_iter()
            .filter_map(|record| {
                serde_json::from_str(&record.key)
                    .ok()
                    .map(|key| SecondLevelFile { key, size: record.size })
            })
            .collect())
    }

    // == Purge Expired ==
    /// Deletes every expired or unreadable record. Returns the number of
    /// expired entries removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, RegistryError> {
        let mut purged = 0;
        for record in self.enumerate()? {
            match self.read_metadata(&record.key) {
                Ok(Some(meta)) if !meta.is_valid(now) => {
                    self.registry.delete(&self.namespace, &record.key)?;
                    purged += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Dropping unreadable second-level record {}: {}", record.key, e);
                    self.delete_quietly(&record.key);
                }
            }
        }
        Ok(purged)
    }
}

//! Cache Store Module
//!
//! Main cache engine combining the first-level HashMap, strategy-driven
//! eviction, TTL expiry and the persistence gateway.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{
    current_time, select_victims, CacheEntry, CacheKey, CacheStats, EntryMetadata, Ttl,
};
use crate::config::{CacheConfig, CleanupStrategy, PersistStrategy};
use crate::error::{CacheError, PersistError, Result};
use crate::persistence::{
    open_registry, JsonCodec, LoadOutcome, PersistenceGateway, Registry, SecondLevelFile,
    ValueCodec,
};

/// What caused a first-level cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupTrigger {
    /// Overflow after an insert or promotion
    Insert,
    /// Caller asked for it
    Explicit,
}

// == Cache Store ==
/// Two-tier cache store.
///
/// Every operation runs inside one exclusive critical section, second-level
/// I/O included. Persistence failures are logged and absorbed; only
/// construction reports errors.
pub struct CacheStore<K: CacheKey, V: Send + 'static> {
    state: Mutex<StoreState<K, V>>,
}

struct StoreState<K, V> {
    config: CacheConfig,
    /// First level
    entries: HashMap<K, CacheEntry<K, V>>,
    gateway: PersistenceGateway<K, V>,
    stats: CacheStats,
    next_sequence: u64,
}

impl<K, V> CacheStore<K, V>
where
    K: CacheKey,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    // == Constructor ==
    /// Creates a store persisting values as JSON into the backend selected
    /// by `config.second_level_target`.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_codec(config, JsonCodec)
    }
}

impl<K: CacheKey, V: Send + 'static> CacheStore<K, V> {
    /// Creates a store with a custom value codec.
    pub fn with_codec<C>(config: CacheConfig, codec: C) -> Result<Self>
    where
        C: ValueCodec<V> + 'static,
    {
        config.validate()?;
        let registry = open_registry(
            config.second_level_target,
            &config.cache_directory,
            &config.preferences_path,
        )?;
        Self::with_registry(config, registry, Arc::new(codec))
    }

    /// Creates a store on top of any registry implementation.
    pub fn with_registry(
        config: CacheConfig,
        registry: Arc<dyn Registry>,
        codec: Arc<dyn ValueCodec<V>>,
    ) -> Result<Self> {
        config.validate()?;
        let gateway = PersistenceGateway::new(
            config.name.clone(),
            registry,
            codec,
            config.second_level_limit,
            config.cleanup_strategy,
        );
        debug!(
            "Cache store {} created: first_level_limit={}, second_level_limit={}, \
             cleanup={}, persist={}",
            config.name,
            config.first_level_limit,
            config.second_level_limit,
            config.cleanup_strategy,
            config.persist_strategy
        );

        Ok(Self {
            state: Mutex::new(StoreState {
                config,
                entries: HashMap::new(),
                gateway,
                stats: CacheStats::new(),
                next_sequence: 0,
            }),
        })
    }

    // == Get ==
    /// Retrieves a value by key, first level first.
    ///
    /// Expired entries are purged from the tier they were found in and
    /// reported as a miss.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.state.lock().get(key, current_time())
    }

    /// Metadata of a live entry without counting it as a read.
    pub fn entry_metadata(&self, key: &K) -> Option<EntryMetadata> {
        self.state.lock().entry_metadata(key, current_time())
    }

    // == Set ==
    /// Stores a value with the store's default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, Ttl::StoreDefault);
    }

    /// Stores a value with an explicit TTL. A zero duration means the store
    /// default; use [`Ttl::Never`] for entries that never expire.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: impl Into<Ttl>) {
        self.state.lock().set(key, value, ttl.into(), current_time());
    }

    // == Remove ==
    /// Deletes a key from both tiers. Missing keys are fine.
    pub fn remove(&self, key: &K) {
        self.state.lock().remove(key);
    }

    // == Cleanup ==
    /// Evicts up to `count` first-level entries chosen by the cleanup
    /// strategy, persisting them when the second level is enabled.
    ///
    /// Returns the number of entries removed from the first level.
    pub fn cleanup_first_level(&self, count: usize) -> usize {
        self.state
            .lock()
            .cleanup(count, CleanupTrigger::Explicit, current_time())
    }

    /// Evicts however many entries exceed `first_level_limit`.
    pub fn cleanup_overflow(&self) -> usize {
        let mut state = self.state.lock();
        let overflow = state.overflow();
        state.cleanup(overflow, CleanupTrigger::Explicit, current_time())
    }

    // == Persist ==
    /// Moves every live first-level entry into the second level.
    ///
    /// Expired entries are dropped instead; entries that cannot be persisted
    /// stay in the first level. Returns the number persisted.
    pub fn persist(&self) -> usize {
        self.state.lock().persist_all(current_time())
    }

    /// Removes expired entries from both tiers. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.state.lock().purge_expired(current_time())
    }

    // == Clear ==
    pub fn clear_cache(&self) {
        let mut state = self.state.lock();
        state.clear_first_level();
        state.clear_second_level();
    }

    /// Drops the first level without persisting anything.
    pub fn clear_first_level_cache(&self) {
        self.state.lock().clear_first_level();
    }

    pub fn clear_second_level_cache(&self) {
        self.state.lock().clear_second_level();
    }

    // == Introspection ==
    pub fn name(&self) -> String {
        self.state.lock().config.name.clone()
    }

    pub fn config(&self) -> CacheConfig {
        self.state.lock().config.clone()
    }

    /// True when the second level is enabled (`second_level_limit > 0`).
    pub fn is_persisting(&self) -> bool {
        self.state.lock().persisting()
    }

    pub fn first_level_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn first_level_keys(&self) -> Vec<K> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Number of persisted entries; scans the registry.
    pub fn second_level_count(&self) -> usize {
        self.state.lock().second_level_files().len()
    }

    /// Persisted entries with their stored sizes.
    pub fn second_level_files(&self) -> Vec<SecondLevelFile<K>> {
        self.state.lock().second_level_files()
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.set_first_level_entries(state.entries.len());
        stats
    }

    // == Reconfiguration ==
    pub fn set_cleanup_strategy(&self, strategy: CleanupStrategy) {
        let mut state = self.state.lock();
        state.config.cleanup_strategy = strategy;
        state.gateway.set_cleanup_strategy(strategy);
    }

    pub fn set_persist_strategy(&self, strategy: PersistStrategy) {
        self.state.lock().config.persist_strategy = strategy;
    }

    /// Changes the first-level bound, evicting immediately when shrinking.
    pub fn set_first_level_limit(&self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(CacheError::InvalidConfig(
                "first_level_limit must be greater than zero".to_string(),
            ));
        }
        let mut state = self.state.lock();
        state.config.first_level_limit = limit;
        let overflow = state.overflow();
        state.cleanup(overflow, CleanupTrigger::Explicit, current_time());
        Ok(())
    }

    /// Changes the second-level bound; 0 switches persistence off. Existing
    /// records are trimmed on the next write.
    pub fn set_second_level_limit(&self, limit: usize) {
        let mut state = self.state.lock();
        state.config.second_level_limit = limit;
        state.gateway.set_limit(limit);
    }

    pub fn set_default_time_to_life(&self, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidConfig(
                "default_time_to_life must be greater than zero".to_string(),
            ));
        }
        self.state.lock().config.default_time_to_life = ttl;
        Ok(())
    }

    pub fn set_promote_on_second_level_hit(&self, promote: bool) {
        self.state.lock().config.promote_on_second_level_hit = promote;
    }

    pub fn set_persist_on_drop(&self, persist: bool) {
        self.state.lock().config.persist_on_drop = persist;
    }
}

impl<K: CacheKey, V: Send + 'static> Drop for CacheStore<K, V> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.config.persist_on_drop {
            let persisted = state.persist_all(current_time());
            debug!(
                "Cache store {} dropped, persisted {} entries",
                state.config.name, persisted
            );
        }
    }
}

impl<K: CacheKey, V: Send + 'static> fmt::Debug for CacheStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheStore")
            .field("name", &state.config.name)
            .field("first_level_count", &state.entries.len())
            .field("first_level_limit", &state.config.first_level_limit)
            .field("second_level_limit", &state.config.second_level_limit)
            .finish()
    }
}

impl<K: CacheKey, V> StoreState<K, V> {
    fn persisting(&self) -> bool {
        self.config.second_level_limit > 0
    }

    fn overflow(&self) -> usize {
        self.entries
            .len()
            .saturating_sub(self.config.first_level_limit)
    }

    fn sync_count(&mut self) {
        self.stats.set_first_level_entries(self.entries.len());
    }

    fn get(&mut self, key: &K, now: DateTime<Utc>) -> Option<V>
    where
        V: Clone,
    {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.is_valid(now) {
                entry.touch(now);
                let value = entry.value().clone();
                self.stats.record_first_level_hit();
                return Some(value);
            }
            self.entries.remove(key);
            self.sync_count();
            self.stats.record_expiration();
            self.stats.record_miss();
            debug!("First-level entry {:?} expired", key);
            return None;
        }

        if !self.persisting() {
            self.stats.record_miss();
            return None;
        }

        match self.gateway.load_entry(key, now) {
            Ok(LoadOutcome::Hit(mut entry)) => {
                entry.touch(now);
                self.stats.record_second_level_hit();
                let value = entry.value().clone();
                if self.config.promote_on_second_level_hit {
                    self.promote(entry, now);
                } else {
                    self.record_second_level_access(&entry);
                }
                Some(value)
            }
            Ok(LoadOutcome::Expired) => {
                self.stats.record_expiration();
                self.stats.record_miss();
                None
            }
            Ok(LoadOutcome::Missing) => {
                self.stats.record_miss();
                None
            }
            Err(e) => {
                warn!("Second-level read of {:?} failed: {}", key, e);
                self.stats.record_miss();
                None
            }
        }
    }

    // == Promote ==
    /// Moves a second-level hit into the first level. Oversized entries and
    /// entries whose record cannot be deleted stay where they are.
    fn promote(&mut self, entry: CacheEntry<K, V>, now: DateTime<Utc>) {
        let oversized = match (
            self.config.first_level_entry_size_limit,
            self.gateway.encode_value(entry.value()),
        ) {
            (Some(limit), Ok(bytes)) => bytes.len() > limit,
            _ => false,
        };

        if oversized {
            self.record_second_level_access(&entry);
            return;
        }

        match self.gateway.remove_entry(entry.key()) {
            Ok(()) => {
                debug!("Promoted {:?} to the first level", entry.key());
                self.entries.insert(entry.key().clone(), entry);
                self.enforce_first_level_limit(now);
                self.sync_count();
            }
            Err(e) => {
                warn!("Keeping {:?} in the second level: {}", entry.key(), e);
                self.record_second_level_access(&entry);
            }
        }
    }

    /// Writes the touched metadata of a second-level hit back to its record.
    fn record_second_level_access(&self, entry: &CacheEntry<K, V>) {
        if self.config.persist_strategy == PersistStrategy::OnCleanOnly {
            return;
        }
        if let Err(e) = self.gateway.update_entry(entry) {
            warn!("Failed to record access to {:?}: {}", entry.key(), e);
        }
    }

    fn entry_metadata(&mut self, key: &K, now: DateTime<Utc>) -> Option<EntryMetadata> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid(now) {
                return Some(*entry.metadata());
            }
            self.entries.remove(key);
            self.sync_count();
            self.stats.record_expiration();
            return None;
        }

        if !self.persisting() {
            return None;
        }
        match self.gateway.load_entry(key, now) {
            Ok(LoadOutcome::Hit(entry)) => Some(*entry.metadata()),
            Ok(LoadOutcome::Expired) => {
                self.stats.record_expiration();
                None
            }
            Ok(LoadOutcome::Missing) => None,
            Err(e) => {
                warn!("Second-level read of {:?} failed: {}", key, e);
                None
            }
        }
    }

    fn set(&mut self, key: K, value: V, ttl: Ttl, now: DateTime<Utc>) {
        let time_to_life = ttl.resolve(self.config.default_time_to_life);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let entry = CacheEntry::new(key, value, time_to_life, sequence, now);

        let Some(entry) = self.route_oversized(entry, now) else {
            return;
        };

        // The previous version may live in the second level
        if self.persisting() {
            if let Err(e) = self.gateway.remove_entry(entry.key()) {
                warn!("Failed to drop persisted copy of {:?}: {}", entry.key(), e);
            }
        }
        self.entries.insert(entry.key().clone(), entry);
        self.enforce_first_level_limit(now);
        self.sync_count();
    }

    // == Route Oversized ==
    /// Writes entries above `first_level_entry_size_limit` straight to the
    /// second level. Hands the entry back when it belongs in the first level:
    /// no size limit, no second level, unmeasurable value or failed write.
    fn route_oversized(
        &mut self,
        entry: CacheEntry<K, V>,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<K, V>> {
        let Some(limit) = self.config.first_level_entry_size_limit else {
            return Some(entry);
        };
        if !self.persisting() {
            return Some(entry);
        }

        let bytes = match self.gateway.encode_value(entry.value()) {
            Ok(bytes) if bytes.len() > limit => bytes,
            Ok(_) => return Some(entry),
            Err(e) => {
                debug!("Cannot measure {:?}, keeping it in memory: {}", entry.key(), e);
                return Some(entry);
            }
        };

        let size = bytes.len();
        match self.gateway.persist_encoded(&entry, bytes, now) {
            Ok(()) => {
                self.stats.record_persisted();
                if self.entries.remove(entry.key()).is_some() {
                    self.sync_count();
                }
                debug!(
                    "Entry {:?} ({} bytes) exceeds {} bytes, stored in the second level",
                    entry.key(),
                    size,
                    limit
                );
                None
            }
            Err(e) => {
                self.stats.record_persist_failure();
                warn!(
                    "Failed to persist oversized entry {:?}, keeping it in memory: {}",
                    entry.key(),
                    e
                );
                Some(entry)
            }
        }
    }

    fn enforce_first_level_limit(&mut self, now: DateTime<Utc>) -> usize {
        let overflow = self.overflow();
        if overflow == 0 {
            return 0;
        }
        self.cleanup(overflow, CleanupTrigger::Insert, now)
    }

    // == Cleanup ==
    /// Removes up to `count` victims. Each victim is handled on its own: a
    /// failed write drops that entry and moves on to the next one.
    fn cleanup(&mut self, count: usize, trigger: CleanupTrigger, now: DateTime<Utc>) -> usize {
        let victims = select_victims(
            self.entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.metadata())),
            count,
            self.config.cleanup_strategy,
            now,
        );

        let persist = self.persisting();

        let mut removed = 0;
        for key in victims {
            let Some(entry) = self.entries.remove(&key) else {
                continue;
            };
            removed += 1;
            self.stats.record_eviction();

            if !entry.is_valid(now) {
                self.stats.record_expiration();
                debug!("Evicted expired entry {:?}", key);
            } else if persist {
                self.persist_entry(&entry, now);
            } else {
                debug!("Evicted {:?} without persisting", key);
            }
        }

        self.sync_count();
        if removed > 0 {
            debug!(
                "Cleanup of store {} removed {} entries ({:?})",
                self.config.name, removed, trigger
            );
        }
        removed
    }

    fn persist_entry(&mut self, entry: &CacheEntry<K, V>, now: DateTime<Utc>) -> bool {
        match self.gateway.persist_entry(entry, now) {
            Ok(()) => {
                self.stats.record_persisted();
                debug!("Persisted {:?} to the second level", entry.key());
                true
            }
            Err(PersistError::NotSerializable(reason)) => {
                self.stats.record_persist_failure();
                debug!("Entry {:?} is not serializable: {}", entry.key(), reason);
                false
            }
            Err(e) => {
                self.stats.record_persist_failure();
                warn!("Failed to persist {:?}: {}", entry.key(), e);
                false
            }
        }
    }

    // == Persist All ==
    fn persist_all(&mut self, now: DateTime<Utc>) -> usize {
        if !self.persisting() {
            return 0;
        }

        let mut keys: Vec<(u64, K)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.metadata().sequence, key.clone()))
            .collect();
        keys.sort_by_key(|(sequence, _)| *sequence);

        let mut persisted = 0;
        for (_, key) in keys {
            let Some(entry) = self.entries.remove(&key) else {
                continue;
            };
            if !entry.is_valid(now) {
                self.stats.record_expiration();
                continue;
            }
            if self.persist_entry(&entry, now) {
                persisted += 1;
            } else {
                self.entries.insert(key, entry);
            }
        }

        self.sync_count();
        info!(
            "Store {} persisted {} entries, {} left in memory",
            self.config.name,
            persisted,
            self.entries.len()
        );
        persisted
    }

    fn remove(&mut self, key: &K) {
        if self.entries.remove(key).is_some() {
            self.sync_count();
        }
        if self.persisting() {
            if let Err(e) = self.gateway.remove_entry(key) {
                warn!("Failed to remove persisted {:?}: {}", key, e);
            }
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid(now));
        let mut purged = before - self.entries.len();

        if self.persisting() {
            match self.gateway.purge_expired(now) {
                Ok(count) => purged += count,
                Err(e) => warn!("Second-level purge of store {} failed: {}", self.config.name, e),
            }
        }

        self.stats.record_expirations(purged);
        self.sync_count();
        purged
    }

    fn clear_first_level(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        self.sync_count();
        info!("Cleared first level of store {} ({} entries)", self.config.name, dropped);
    }

    fn clear_second_level(&mut self) {
        if !self.persisting() {
            return;
        }
        match self.gateway.clear_all_for_store() {
            Ok(()) => info!("Cleared second level of store {}", self.config.name),
            Err(e) => warn!("Failed to clear second level of store {}: {}", self.config.name, e),
        }
    }

    fn second_level_files(&self) -> Vec<SecondLevelFile<K>> {
        if !self.persisting() {
            return Vec::new();
        }
        self.gateway.files().unwrap_or_else(|e| {
            warn!("Failed to list second level of store {}: {}", self.config.name, e);
            Vec::new()
        })
    }
}

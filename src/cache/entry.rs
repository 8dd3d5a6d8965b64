//! Cache Entry Module
//!
//! Defines individual cache entries, their access metadata and TTL validity.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

// == Time To Life ==
/// TTL requested by a caller of `set`.
///
/// A zero duration converts to [`Ttl::StoreDefault`]; entries that must never
/// expire use [`Ttl::Never`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the store's `default_time_to_life`
    #[default]
    StoreDefault,
    /// Expire after the given duration
    After(Duration),
    /// Never expire
    Never,
}

impl Ttl {
    /// Resolves to a concrete TTL, `None` meaning "never expires".
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Ttl::StoreDefault => Some(default),
            Ttl::After(ttl) if ttl.is_zero() => Some(default),
            Ttl::After(ttl) => Some(ttl),
            Ttl::Never => None,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Ttl::StoreDefault
        } else {
            Ttl::After(ttl)
        }
    }
}

// == Entry Metadata ==
/// Timestamps and counters used for validity checks and eviction ranking.
///
/// Carried alongside the value in persisted envelopes so ranking survives a
/// reload of the second level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    pub added_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    /// `None` = never expires
    pub time_to_life: Option<Duration>,
    /// Insertion order within the owning store, used to break ranking ties
    pub sequence: u64,
}

impl EntryMetadata {
    pub fn new(time_to_life: Option<Duration>, sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            added_at: now,
            last_accessed_at: now,
            access_count: 0,
            time_to_life,
            sequence,
        }
    }

    /// Time since the entry was added.
    pub fn elapsed(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.added_at)
    }

    // == Remaining ==
    /// Remaining lifetime, `None` for entries that never expire.
    ///
    /// Negative or zero once the TTL has elapsed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.time_to_life.map(|ttl| {
            TimeDelta::from_std(ttl)
                .unwrap_or(TimeDelta::MAX)
                .checked_sub(&self.elapsed(now))
                .unwrap_or(TimeDelta::MAX)
        })
    }

    /// Valid while `now < added_at + time_to_life`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self.remaining(now) {
            Some(remaining) => remaining > TimeDelta::zero(),
            None => true,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }
}

// == Cache Entry ==
/// A stored value with its key and access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    key: K,
    value: V,
    meta: EntryMetadata,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates a new entry with `added_at = last_accessed_at = now` and no reads.
    ///
    /// # Arguments
    /// * `key` - The entry key
    /// * `value` - The payload
    /// * `time_to_life` - Resolved TTL, `None` = never expires
    /// * `sequence` - Insertion order assigned by the owning store
    /// * `now` - Creation time
    pub fn new(
        key: K,
        value: V,
        time_to_life: Option<Duration>,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            value,
            meta: EntryMetadata::new(time_to_life, sequence, now),
        }
    }

    /// Reassembles an entry from persisted parts.
    pub(crate) fn from_parts(key: K, value: V, meta: EntryMetadata) -> Self {
        Self { key, value, meta }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.meta
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.meta.added_at
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.meta.last_accessed_at
    }

    pub fn access_count(&self) -> u64 {
        self.meta.access_count
    }

    pub fn time_to_life(&self) -> Option<Duration> {
        self.meta.time_to_life
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> TimeDelta {
        self.meta.elapsed(now)
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.meta.remaining(now)
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.meta.is_valid(now)
    }

    // == Touch ==
    /// Records a successful read: updates `last_accessed_at` and bumps
    /// `access_count`. The only mutator on an entry.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.meta.touch(now);
    }
}

// == Utility Functions ==
/// Returns the current wall-clock time.
pub fn current_time() -> DateTime<Utc> {
    Utc::now()
}

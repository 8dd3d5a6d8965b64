//! Cache Statistics Module
//!
//! Tracks hits per tier, misses, expirations, evictions and persistence outcomes.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads answered from the first level
    pub first_level_hits: u64,
    /// Reads answered from the second level
    pub second_level_hits: u64,
    /// Reads that found nothing valid in either tier
    pub misses: u64,
    /// Entries purged because their TTL had elapsed
    pub expirations: u64,
    /// Entries removed from the first level by cleanup
    pub evictions: u64,
    /// Entries written to the second level
    pub persisted: u64,
    /// Attempted second-level writes that failed
    pub persist_failures: u64,
    /// Current number of first-level entries
    pub first_level_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.first_level_hits + self.second_level_hits
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate across both tiers.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub(crate) fn record_first_level_hit(&mut self) {
        self.first_level_hits += 1;
    }

    pub(crate) fn record_second_level_hit(&mut self) {
        self.second_level_hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_expiration(&mut self) {
        self.record_expirations(1);
    }

    pub(crate) fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub(crate) fn record_persisted(&mut self) {
        self.persisted += 1;
    }

    pub(crate) fn record_persist_failure(&mut self) {
        self.persist_failures += 1;
    }

    pub(crate) fn set_first_level_entries(&mut self, count: usize) {
        self.first_level_entries = count;
    }
}

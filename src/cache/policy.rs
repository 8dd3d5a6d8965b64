//! Eviction Policy Module
//!
//! Ranks cache entries for eviction according to a [`CleanupStrategy`].

use std::cmp::Ordering;

use chrono::{DateTime, TimeDelta, Utc};

use crate::cache::EntryMetadata;
use crate::config::CleanupStrategy;

// == Select Victims ==
/// Picks up to `count` entries to evict, best victim first.
///
/// Pure and deterministic: ties on the strategy's ranking are broken by
/// insertion order, oldest first. The caller performs the actual removal.
///
/// # Arguments
/// * `candidates` - Identifier and metadata of every entry in the tier
/// * `count` - Maximum number of victims
/// * `strategy` - Ranking to apply
/// * `now` - Reference time for TTL ranking
pub fn select_victims<'a, T, I>(
    candidates: I,
    count: usize,
    strategy: CleanupStrategy,
    now: DateTime<Utc>,
) -> Vec<T>
where
    I: IntoIterator<Item = (T, &'a EntryMetadata)>,
{
    if count == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<(T, &EntryMetadata)> = candidates.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| {
        compare(a, b, strategy, now).then_with(|| insertion_order(a, b))
    });
    ranked.truncate(count);
    ranked.into_iter().map(|(id, _)| id).collect()
}

fn compare(
    a: &EntryMetadata,
    b: &EntryMetadata,
    strategy: CleanupStrategy,
    now: DateTime<Utc>,
) -> Ordering {
    match strategy {
        CleanupStrategy::LastAccessed => a.last_accessed_at.cmp(&b.last_accessed_at),
        CleanupStrategy::LastAdded => a.added_at.cmp(&b.added_at),
        // Expired entries have remaining <= 0 and therefore rank first
        CleanupStrategy::RemainingTtl => remaining_rank(a, now).cmp(&remaining_rank(b, now)),
        CleanupStrategy::AccessCount => a.access_count.cmp(&b.access_count),
    }
}

fn remaining_rank(meta: &EntryMetadata, now: DateTime<Utc>) -> TimeDelta {
    meta.remaining(now).unwrap_or(TimeDelta::MAX)
}

fn insertion_order(a: &EntryMetadata, b: &EntryMetadata) -> Ordering {
    a.added_at
        .cmp(&b.added_at)
        .then_with(|| a.sequence.cmp(&b.sequence))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn meta(
        sequence: u64,
        added_offset: i64,
        ttl_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> EntryMetadata {
        EntryMetadata::new(
            ttl_secs.map(Duration::from_secs),
            sequence,
            now + TimeDelta::seconds(added_offset),
        )
    }

    #[test]
    fn test_last_added_evicts_oldest_insert() {
        let now = Utc::now();
        let a = meta(0, 0, Some(60), now);
        let b = meta(1, 1, Some(60), now);
        let c = meta(2, 2, Some(60), now);

        let victims = select_victims(
            [("c", &c), ("a", &a), ("b", &b)],
            1,
            CleanupStrategy::LastAdded,
            now,
        );
        assert_eq!(victims, vec!["a"]);
    }

    #[test]
    fn test_last_accessed_prefers_least_recently_read() {
        let now = Utc::now();
        let mut a = meta(0, 0, Some(60), now);
        let b = meta(1, 1, Some(60), now);
        a.touch(now + TimeDelta::seconds(5));

        let victims = select_victims([("a", &a), ("b", &b)], 1, CleanupStrategy::LastAccessed, now);
        assert_eq!(victims, vec!["b"]);
    }

    #[test]
    fn test_access_count_prefers_least_frequently_read() {
        let now = Utc::now();
        let mut a = meta(0, 0, Some(60), now);
        let b = meta(1, 1, Some(60), now);
        for _ in 0..3 {
            a.touch(now);
        }

        let victims = select_victims([("a", &a), ("b", &b)], 1, CleanupStrategy::AccessCount, now);
        assert_eq!(victims, vec!["b"]);
    }

    #[test]
    fn test_remaining_ttl_ranks_expired_first_and_never_last() {
        let now = Utc::now();
        let forever = meta(0, 0, None, now);
        let long = meta(1, 0, Some(600), now);
        let short = meta(2, 0, Some(30), now);
        let expired = meta(3, -120, Some(60), now);

        let victims = select_victims(
            [("forever", &forever), ("long", &long), ("short", &short), ("expired", &expired)],
            4,
            CleanupStrategy::RemainingTtl,
            now,
        );
        assert_eq!(victims, vec!["expired", "short", "long", "forever"]);
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let now = Utc::now();
        let first = meta(0, 0, Some(60), now);
        let second = meta(1, 0, Some(60), now);
        let third = meta(2, 0, Some(60), now);

        for strategy in [
            CleanupStrategy::LastAccessed,
            CleanupStrategy::LastAdded,
            CleanupStrategy::RemainingTtl,
            CleanupStrategy::AccessCount,
        ] {
            let victims = select_victims(
                [(3, &third), (1, &first), (2, &second)],
                2,
                strategy,
                now,
            );
            assert_eq!(victims, vec![1, 2], "strategy {}", strategy);
        }
    }

    #[test]
    fn test_count_bounds() {
        let now = Utc::now();
        let a = meta(0, 0, Some(60), now);
        let b = meta(1, 1, Some(60), now);

        assert!(
            select_victims([("a", &a), ("b", &b)], 0, CleanupStrategy::LastAdded, now).is_empty()
        );
        assert_eq!(
            select_victims([("a", &a), ("b", &b)], 10, CleanupStrategy::LastAdded, now),
            vec!["a", "b"]
        );
        let none = Vec::<(&str, &EntryMetadata)>::new();
        assert!(select_victims(none, 3, CleanupStrategy::LastAdded, now).is_empty());
    }
}

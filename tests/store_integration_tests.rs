//! Integration Tests for the Cache Store
//!
//! Exercises both second-level backends on disk, including reopening a store
//! to simulate a process restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tier_cache::persistence::{DirectoryRegistry, MemoryOnlyCodec, Registry};
use tier_cache::{
    clear_all_cached_files_in, CacheConfig, CacheStore, CleanupStrategy, PersistStrategy,
    SecondLevelTarget, Ttl,
};

// == Helper Functions ==

fn folder_config(dir: &TempDir, name: &str) -> CacheConfig {
    CacheConfig::new(name)
        .with_cache_directory(dir.path().join("cache"))
        .with_second_level_target(SecondLevelTarget::CacheFolder)
        .with_first_level_limit(2)
        .with_second_level_limit(100)
        .with_cleanup_strategy(CleanupStrategy::LastAdded)
}

fn preferences_config(dir: &TempDir, name: &str) -> CacheConfig {
    CacheConfig::new(name)
        .with_preferences_path(dir.path().join("prefs").join("preferences.json"))
        .with_second_level_target(SecondLevelTarget::Preferences)
        .with_first_level_limit(2)
        .with_second_level_limit(100)
        .with_cleanup_strategy(CleanupStrategy::LastAdded)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Thumbnail {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

// == Restart Round Trip ==

fn assert_survives_restart(config: CacheConfig) {
    {
        let store: CacheStore<String, String> = CacheStore::new(config.clone()).unwrap();
        store.set_with_ttl("k".to_string(), "v".to_string(), Duration::from_secs(100));
        store.set("filler1".to_string(), "x".to_string());
        store.set("filler2".to_string(), "y".to_string());
        assert_eq!(store.second_level_count(), 1, "k should have been evicted to disk");
    }

    sleep(Duration::from_millis(50));

    let reopened: CacheStore<String, String> = CacheStore::new(config).unwrap();
    assert_eq!(reopened.first_level_count(), 0);

    let meta = reopened.entry_metadata(&"k".to_string()).unwrap();
    let remaining = meta.remaining(chrono::Utc::now()).unwrap();
    assert!(remaining < chrono::TimeDelta::seconds(100), "TTL must not be reset");
    assert!(remaining > chrono::TimeDelta::seconds(95));

    assert_eq!(reopened.get(&"k".to_string()), Some("v".to_string()));
}

#[test]
fn test_cache_folder_survives_restart() {
    let dir = TempDir::new().unwrap();
    assert_survives_restart(folder_config(&dir, "restart"));
}

#[test]
fn test_preferences_survive_restart() {
    let dir = TempDir::new().unwrap();
    assert_survives_restart(preferences_config(&dir, "restart"));
}

#[test]
fn test_access_ranking_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = folder_config(&dir, "ranking")
        .with_first_level_limit(1)
        .with_second_level_limit(2)
        .with_cleanup_strategy(CleanupStrategy::AccessCount);

    {
        let store: CacheStore<String, String> = CacheStore::new(config.clone()).unwrap();
        store.set("hot".to_string(), "h".to_string());
        for _ in 0..3 {
            store.get(&"hot".to_string());
        }
        store.set("cold".to_string(), "c".to_string());
        store.persist();
        assert_eq!(store.second_level_count(), 2);
    }

    let reopened: CacheStore<String, String> = CacheStore::new(config).unwrap();
    reopened.set("new".to_string(), "n".to_string());
    reopened.persist();

    // The second level was full: the least read persisted entry goes
    assert_eq!(reopened.get(&"cold".to_string()), None);
    assert_eq!(reopened.get(&"hot".to_string()), Some("h".to_string()));
    assert_eq!(reopened.get(&"new".to_string()), Some("n".to_string()));
}

// == Expiry ==

#[test]
fn test_expiry_purges_both_tiers() {
    let dir = TempDir::new().unwrap();
    let store: CacheStore<String, String> = CacheStore::new(folder_config(&dir, "expiry")).unwrap();

    store.set_with_ttl("k".to_string(), "v".to_string(), Duration::from_millis(200));
    store.set("a".to_string(), "1".to_string());
    store.set("b".to_string(), "2".to_string());
    assert_eq!(store.second_level_count(), 1);

    sleep(Duration::from_millis(300));

    assert_eq!(store.get(&"k".to_string()), None);
    assert_eq!(store.second_level_count(), 0);
    assert_eq!(store.first_level_count(), 2);
}

#[test]
fn test_never_expiring_entry_outlives_default() {
    let dir = TempDir::new().unwrap();
    let config =
        folder_config(&dir, "forever").with_default_time_to_life(Duration::from_millis(50));
    let store: CacheStore<String, String> = CacheStore::new(config).unwrap();

    store.set_with_ttl("forever".to_string(), "v".to_string(), Ttl::Never);
    store.set("default".to_string(), "v".to_string());
    sleep(Duration::from_millis(100));

    assert_eq!(store.get(&"forever".to_string()), Some("v".to_string()));
    assert_eq!(store.get(&"default".to_string()), None);
}

// == Persistence Disabled ==

#[test]
fn test_disabled_second_level_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = folder_config(&dir, "disabled").with_second_level_limit(0);
    let store: CacheStore<String, String> = CacheStore::new(config).unwrap();

    for i in 0..10 {
        store.set(format!("k{}", i), "v".to_string());
    }
    assert_eq!(store.persist(), 0);
    store.clear_second_level_cache();

    assert!(!store.is_persisting());
    assert!(!dir.path().join("cache").exists());
}

// == Values and Namespaces ==

#[test]
fn test_structured_values_and_keys() {
    let dir = TempDir::new().unwrap();
    let config = folder_config(&dir, "thumbs").with_first_level_entry_size_limit(64);
    let store: CacheStore<(u32, u32), Thumbnail> = CacheStore::new(config).unwrap();

    let small = Thumbnail { width: 1, height: 1, pixels: vec![0] };
    let large = Thumbnail { width: 16, height: 16, pixels: vec![255; 256] };
    store.set((1, 1), small.clone());
    store.set((16, 16), large.clone());

    assert_eq!(store.first_level_keys(), vec![(1, 1)]);
    let files = store.second_level_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].key, (16, 16));
    assert!(files[0].size > 256);

    assert_eq!(store.get(&(1, 1)), Some(small));
    assert_eq!(store.get(&(16, 16)), Some(large));
}

#[test]
fn test_memory_only_values_never_reach_disk() {
    let dir = TempDir::new().unwrap();
    let store: CacheStore<String, HashMap<String, String>> =
        CacheStore::with_codec(folder_config(&dir, "memonly"), MemoryOnlyCodec).unwrap();

    for i in 0..5 {
        store.set(format!("k{}", i), HashMap::new());
    }

    assert_eq!(store.first_level_count(), 2);
    assert_eq!(store.second_level_count(), 0);
    assert_eq!(store.stats().persist_failures, 3);
}

#[test]
fn test_namespaces_are_isolated() {
    let dir = TempDir::new().unwrap();
    let one: CacheStore<String, String> = CacheStore::new(folder_config(&dir, "one")).unwrap();
    let two: CacheStore<String, String> = CacheStore::new(folder_config(&dir, "two")).unwrap();

    one.set("shared".to_string(), "from one".to_string());
    one.persist();
    two.set("shared".to_string(), "from two".to_string());
    two.persist();

    one.clear_second_level_cache();

    assert_eq!(one.get(&"shared".to_string()), None);
    assert_eq!(two.get(&"shared".to_string()), Some("from two".to_string()));
}

#[test]
fn test_clear_all_stores_through_registry() {
    let dir = TempDir::new().unwrap();
    let one: CacheStore<String, String> = CacheStore::new(folder_config(&dir, "one")).unwrap();
    let two: CacheStore<String, String> = CacheStore::new(folder_config(&dir, "two")).unwrap();
    one.set("a".to_string(), "1".to_string());
    two.set("b".to_string(), "2".to_string());
    one.persist();
    two.persist();

    DirectoryRegistry::new(dir.path().join("cache")).clear_all().unwrap();

    assert_eq!(one.second_level_count(), 0);
    assert_eq!(two.second_level_count(), 0);
}

#[test]
fn test_clear_all_cached_files_in_cache_directory() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    let store: CacheStore<String, String> =
        CacheStore::new(folder_config(&dir, "global")).unwrap();
    store.set("k".to_string(), "v".to_string());
    store.persist();
    assert!(root.exists());

    clear_all_cached_files_in(&root).unwrap();

    assert!(!root.exists());
    assert_eq!(store.get(&"k".to_string()), None);
}

// == Shared Preferences Document ==

#[test]
fn test_preferences_stores_keep_their_namespaces() {
    let dir = TempDir::new().unwrap();
    {
        let one: CacheStore<String, String> =
            CacheStore::new(preferences_config(&dir, "one")).unwrap();
        let two: CacheStore<String, String> =
            CacheStore::new(preferences_config(&dir, "two")).unwrap();
        one.set("a".to_string(), "1".to_string());
        one.persist();
        two.set("b".to_string(), "2".to_string());
        two.persist();
    }

    let one: CacheStore<String, String> =
        CacheStore::new(preferences_config(&dir, "one")).unwrap();
    let two: CacheStore<String, String> =
        CacheStore::new(preferences_config(&dir, "two")).unwrap();

    assert_eq!(one.second_level_count(), 1);
    assert_eq!(one.get(&"a".to_string()), Some("1".to_string()));
    assert_eq!(two.get(&"b".to_string()), Some("2".to_string()));
}

// == Long Keys ==

#[test]
fn test_long_key_persists_to_cache_folder() {
    let dir = TempDir::new().unwrap();
    let store: CacheStore<String, String> =
        CacheStore::new(folder_config(&dir, "long").with_first_level_limit(1)).unwrap();
    let long_key = "k".repeat(300);

    store.set(long_key.clone(), "v".to_string());
    store.set("short".to_string(), "w".to_string());

    let stats = store.stats();
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.persist_failures, 0);
    assert_eq!(store.second_level_files()[0].key, long_key);
    assert_eq!(store.get(&long_key), Some("v".to_string()));
}

// == Persist Strategies ==

#[test]
fn test_on_clean_only_keeps_overflow_victims() {
    let dir = TempDir::new().unwrap();
    let config = folder_config(&dir, "clean_only")
        .with_first_level_limit(1)
        .with_persist_strategy(PersistStrategy::OnCleanOnly);
    let store: CacheStore<String, String> = CacheStore::new(config).unwrap();

    store.set("A".to_string(), "a".to_string());
    store.set("B".to_string(), "b".to_string());

    assert_eq!(store.second_level_count(), 1);
    assert_eq!(store.get(&"A".to_string()), Some("a".to_string()));
}

// == Concurrency ==

#[test]
fn test_concurrent_access_keeps_bound() {
    let dir = TempDir::new().unwrap();
    let store: Arc<CacheStore<String, u64>> = Arc::new(
        CacheStore::new(folder_config(&dir, "threads").with_first_level_limit(8)).unwrap(),
    );

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50u64 {
                    let key = format!("w{}-{}", worker, i % 12);
                    store.set(key.clone(), i);
                    assert!(store.get(&key).is_some());
                    assert!(store.first_level_count() <= 8);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(store.first_level_count() <= 8);
    assert_eq!(store.first_level_count() + store.second_level_count(), 48);
}

//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations and their outcomes
//! - Versions, optimistic `expected_version` checks and TTL expiry
//! - Flush to SSTable and reads across memtable and tables
//! - Range scans with limits and tombstones
//! - Crash recovery from WAL
//! - Concurrent access patterns
//! - Engine lifecycle (open/close)

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ridgekv::config::{Config, WalSyncStrategy};
use ridgekv::engine::Engine;
use ridgekv::{
    DeleteOptions, KeyRange, KeyValueStore, PutOptions, ReadOptions, RidgeError,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite) // Sync every write for test reliability
        .memtable_size_limit(1024 * 1024) // 1 MB
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn setup_temp_engine_with_small_memtable() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .memtable_size_limit(100) // Very small to trigger flushes
        .compaction_trigger(1000) // Keep tables in level 0
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn put(engine: &Engine, key: &str, value: &str) -> u64 {
    engine
        .put(key.as_bytes(), value.as_bytes(), &PutOptions::default())
        .unwrap()
        .version
}

fn get(engine: &Engine, key: &str) -> Option<Vec<u8>> {
    engine.get(key.as_bytes()).unwrap().map(|r| r.payload)
}

fn delete(engine: &Engine, key: &str) -> bool {
    engine
        .delete(key.as_bytes(), &DeleteOptions::default())
        .unwrap()
        .deleted
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directories() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let config = Config::builder().data_dir(&data_dir).build();

    let _engine = Engine::open(config).unwrap();

    assert!(data_dir.exists());
    assert!(data_dir.join("wal.log").exists());
}

#[test]
fn test_engine_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(0)
        .build();

    assert!(matches!(Engine::open(config), Err(RidgeError::Config(_))));
}

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "hello", "world");

    assert_eq!(get(&engine, "hello"), Some(b"world".to_vec()));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();
    assert_eq!(get(&engine, "nonexistent"), None);
}

#[test]
fn test_engine_put_overwrite() {
    let (_temp, engine) = setup_temp_engine();

    let first = engine
        .put(b"key", b"value1", &PutOptions::default())
        .unwrap();
    let second = engine
        .put(b"key", b"value2", &PutOptions::default())
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert!(second.version > first.version);
    assert_eq!(get(&engine, "key"), Some(b"value2".to_vec()));
}

#[test]
fn test_engine_delete() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "key", "value");
    assert!(delete(&engine, "key"));
    assert_eq!(get(&engine, "key"), None);

    // Deleting again reports nothing was deleted
    assert!(!delete(&engine, "key"));
    assert!(!delete(&engine, "never-existed"));
}

#[test]
fn test_engine_versions_increase() {
    let (_temp, engine) = setup_temp_engine();

    let a = put(&engine, "a", "1");
    let b = put(&engine, "b", "1");
    let c = put(&engine, "a", "2");
    assert!(a < b && b < c);

    let record = engine.get(b"a").unwrap().unwrap();
    assert_eq!(record.version, c as i64);
}

#[test]
fn test_engine_empty_value() {
    let (_temp, engine) = setup_temp_engine();
    put(&engine, "empty", "");
    engine.flush().unwrap();
    assert_eq!(get(&engine, "empty"), Some(Vec::new()));
}

// =============================================================================
// Expected Version Tests
// =============================================================================

#[test]
fn test_expected_version_matches() {
    let (_temp, engine) = setup_temp_engine();
    let v1 = put(&engine, "k", "one");

    let options = PutOptions {
        expected_version: Some(v1),
        ..PutOptions::default()
    };
    let outcome = engine.put(b"k", b"two", &options).unwrap();
    assert!(outcome.version > v1);
    assert_eq!(get(&engine, "k"), Some(b"two".to_vec()));
}

#[test]
fn test_expected_version_mismatch() {
    let (_temp, engine) = setup_temp_engine();
    let v1 = put(&engine, "k", "one");
    put(&engine, "k", "two");

    let options = PutOptions {
        expected_version: Some(v1),
        ..PutOptions::default()
    };
    let err = engine.put(b"k", b"three", &options).unwrap_err();
    match err {
        RidgeError::VersionMismatch { expected, actual } => {
            assert_eq!(expected, v1);
            assert!(actual > v1);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(get(&engine, "k"), Some(b"two".to_vec()));
}

#[test]
fn test_expected_version_zero_means_absent() {
    let (_temp, engine) = setup_temp_engine();
    let create_only = PutOptions {
        expected_version: Some(0),
        ..PutOptions::default()
    };

    assert!(engine.put(b"k", b"first", &create_only).unwrap().created);
    assert!(matches!(
        engine.put(b"k", b"second", &create_only),
        Err(RidgeError::VersionMismatch { expected: 0, .. })
    ));
}

#[test]
fn test_delete_with_expected_version() {
    let (_temp, engine) = setup_temp_engine();
    let v1 = put(&engine, "k", "v");

    let stale = DeleteOptions {
        expected_version: Some(v1 + 100),
        ..DeleteOptions::default()
    };
    assert!(engine.delete(b"k", &stale).is_err());
    assert!(get(&engine, "k").is_some());

    let current = DeleteOptions {
        expected_version: Some(v1),
        ..DeleteOptions::default()
    };
    assert!(engine.delete(b"k", &current).unwrap().deleted);
}

// =============================================================================
// TTL Tests
// =============================================================================

#[test]
fn test_ttl_expires_value() {
    let (_temp, engine) = setup_temp_engine();

    engine
        .put(
            b"session",
            b"token",
            &PutOptions::with_ttl(Duration::from_millis(50)),
        )
        .unwrap();
    let record = engine.get(b"session").unwrap().unwrap();
    assert!(record.expire_at.is_some());

    thread::sleep(Duration::from_millis(120));
    assert_eq!(get(&engine, "session"), None);

    // An expired key counts as absent for the next write
    let outcome = engine
        .put(b"session", b"fresh", &PutOptions::default())
        .unwrap();
    assert!(outcome.created);
}

#[test]
fn test_ttl_survives_flush() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .put(b"long", b"lived", &PutOptions::with_ttl(Duration::from_secs(3600)))
        .unwrap();
    engine.flush().unwrap();

    let record = engine.get(b"long").unwrap().unwrap();
    assert_eq!(record.payload, b"lived".to_vec());
    assert!(record.expire_at.is_some());
}

#[test]
fn test_huge_ttl_saturates_instead_of_expiring() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .put(
            b"forever",
            b"v",
            &PutOptions::with_ttl(Duration::from_secs(u64::MAX)),
        )
        .unwrap();

    let record = engine.get(b"forever").unwrap().unwrap();
    assert_eq!(record.payload, b"v".to_vec());
    assert_eq!(record.expire_at, Some(i64::MAX));
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_engine_flush_creates_sstable() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "key1", "value1");
    put(&engine, "key2", "value2");
    assert_eq!(engine.sstable_count(), 0);

    engine.flush().unwrap();

    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(get(&engine, "key1"), Some(b"value1".to_vec()));
}

#[test]
fn test_engine_flush_empty_memtable_is_noop() {
    let (_temp, engine) = setup_temp_engine();
    engine.flush().unwrap();
    assert_eq!(engine.sstable_count(), 0);
}

#[test]
fn test_engine_automatic_flush() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();

    for i in 0..50 {
        put(&engine, &format!("key{:02}", i), "some-value");
    }

    assert!(engine.sstable_count() > 1);
    for i in 0..50 {
        assert_eq!(
            get(&engine, &format!("key{:02}", i)),
            Some(b"some-value".to_vec())
        );
    }
}

#[test]
fn test_memtable_shadows_sstable() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "key", "old");
    engine.flush().unwrap();
    put(&engine, "key", "new");

    assert_eq!(get(&engine, "key"), Some(b"new".to_vec()));
}

#[test]
fn test_tombstone_in_memtable_hides_sstable_value() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "key", "value");
    engine.flush().unwrap();
    assert!(delete(&engine, "key"));

    assert_eq!(get(&engine, "key"), None);
}

#[test]
fn test_tombstone_in_newer_sstable_hides_older() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "key", "value");
    engine.flush().unwrap();
    delete(&engine, "key");
    engine.flush().unwrap();

    assert_eq!(engine.sstable_count(), 2);
    assert_eq!(get(&engine, "key"), None);
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_merges_memtable_and_tables() {
    let (_temp, engine) = setup_temp_engine();

    put(&engine, "a", "1");
    put(&engine, "b", "1");
    put(&engine, "c", "1");
    engine.flush().unwrap();
    put(&engine, "b", "2");
    delete(&engine, "c");
    put(&engine, "d", "2");

    let results: Vec<(Vec<u8>, Vec<u8>)> = engine
        .scan(KeyRange::all(), &ReadOptions::default())
        .unwrap()
        .map(|(key, record)| (key, record.payload))
        .collect();

    assert_eq!(
        results,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"d".to_vec(), b"2".to_vec()),
        ]
    );
}

#[test]
fn test_scan_range_and_limit() {
    let (_temp, engine) = setup_temp_engine();
    for i in 0..30 {
        put(&engine, &format!("item:{:02}", i), "v");
        if i == 15 {
            engine.flush().unwrap();
        }
    }

    let keys: Vec<Vec<u8>> = engine
        .scan(KeyRange::new("item:10", "item:20"), &ReadOptions::default())
        .unwrap()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys.len(), 10);
    assert_eq!(keys[0], b"item:10".to_vec());
    assert_eq!(keys[9], b"item:19".to_vec());

    let limited = engine
        .scan(KeyRange::prefix(b"item:"), &ReadOptions { limit: Some(5) })
        .unwrap();
    assert_eq!(limited.remaining(), 5);
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_engine_recovery_from_wal() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build();

    let last_version;
    {
        let engine = Engine::open(config.clone()).unwrap();
        put(&engine, "key1", "value1");
        put(&engine, "key2", "value2");
        delete(&engine, "key1");
        last_version = put(&engine, "key3", "value3");
        // Dropped without close: only the WAL holds the data
        assert_eq!(engine.sstable_count(), 0);
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(get(&engine, "key1"), None);
    assert_eq!(get(&engine, "key2"), Some(b"value2".to_vec()));
    assert_eq!(get(&engine, "key3"), Some(b"value3".to_vec()));

    // Recovered entries were flushed and versions keep increasing
    assert_eq!(engine.sstable_count(), 1);
    assert!(put(&engine, "key4", "value4") > last_version);
}

#[test]
fn test_versions_continue_after_flush_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    let last_version;
    {
        let engine = Engine::open(config.clone()).unwrap();
        put(&engine, "a", "1");
        last_version = put(&engine, "b", "2");
        engine.close().unwrap();
    }

    let engine = Engine::open(config).unwrap();
    assert!(put(&engine, "c", "3") > last_version);
    let record = engine.get(b"b").unwrap().unwrap();
    assert_eq!(record.version, last_version as i64);
}

#[test]
fn test_versions_continue_after_compaction_drops_everything() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .compaction_trigger(2)
        .build();

    let first;
    {
        let engine = Engine::open(config.clone()).unwrap();
        first = put(&engine, "a", "x");
        engine.flush().unwrap();
        delete(&engine, "a");
        engine.flush().unwrap();
        engine.wait_for_compactions();
        assert_eq!(engine.sstable_count(), 0);
        engine.close().unwrap();
    }

    let engine = Engine::open(config).unwrap();
    let second = put(&engine, "a", "y");
    assert!(second > first + 1, "version reused: {} then {}", first, second);

    // The version from before the delete must not match the rewritten key
    let result = engine.put(
        b"a",
        b"z",
        &PutOptions {
            expected_version: Some(first),
            ..PutOptions::default()
        },
    );
    assert!(matches!(result, Err(RidgeError::VersionMismatch { .. })));
}

#[test]
fn test_engine_recovery_with_torn_wal_tail() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    {
        let engine = Engine::open(config.clone()).unwrap();
        put(&engine, "kept", "value");
    }
    let wal_path = temp_dir.path().join("wal.log");
    let mut bytes = std::fs::read(&wal_path).unwrap();
    bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 9, 0, 0]);
    std::fs::write(&wal_path, &bytes).unwrap();

    let engine = Engine::open(config).unwrap();
    assert_eq!(get(&engine, "kept"), Some(b"value".to_vec()));
}

#[test]
fn test_engine_close_flushes() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    {
        let engine = Engine::open(config.clone()).unwrap();
        put(&engine, "key", "value");
        engine.close().unwrap();
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(get(&engine, "key"), Some(b"value".to_vec()));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_disjoint_writers_and_readers() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 64 })
        .memtable_size_limit(4 * 1024)
        .build();
    let engine = Arc::new(Engine::open(config).unwrap());

    let mut handles = Vec::new();
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                let key = format!("t{}:{:04}", t, i);
                let value = format!("v{}", i);
                put(&engine, &key, &value);
                assert_eq!(get(&engine, &key), Some(value.into_bytes()));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    engine.wait_for_compactions();
    for t in 0..4 {
        for i in (0..200).step_by(13) {
            let key = format!("t{}:{:04}", t, i);
            assert_eq!(get(&engine, &key), Some(format!("v{}", i).into_bytes()));
        }
    }
}

#[test]
fn test_engine_as_trait_object() {
    let (_temp, engine) = setup_temp_engine();
    let store: &dyn KeyValueStore = &engine;

    store.put(b"k", b"v", &PutOptions::default()).unwrap();
    assert_eq!(store.get(b"k").unwrap().map(|r| r.payload), Some(b"v".to_vec()));
    assert!(store.delete(b"k", &DeleteOptions::default()).unwrap().deleted);
    store.flush().unwrap();
    assert_eq!(store.scan(KeyRange::all(), &ReadOptions::default()).unwrap().count(), 0);
}

#[test]
fn test_stats_reflect_state() {
    let (_temp, engine) = setup_temp_engine();
    put(&engine, "a", "1");
    put(&engine, "b", "2");

    let stats = engine.stats();
    assert_eq!(stats.memtable_entries, 2);
    assert!(stats.memtable_bytes > 0);

    engine.flush().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(stats.tables_per_level.first(), Some(&1));
    assert!(stats.total_table_bytes > 0);
}

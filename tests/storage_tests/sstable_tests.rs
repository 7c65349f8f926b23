//! Tests for SSTable
//!
//! These tests verify:
//! - Write then reopen from the footer
//! - Point lookups across many blocks, tombstones and expiry included
//! - Full and range reads in key order
//! - Keys must be strictly ascending
//! - Footer, magic and index checksum validation
//! - A deleted file surfaces as a read race

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use ridgekv::storage::{SSTable, SSTableBuilder, SSTableOptions};
use ridgekv::{Entry, KeyRange, RidgeError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_table_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("level0-1.sstable");
    (temp_dir, path)
}

fn small_blocks() -> SSTableOptions {
    SSTableOptions {
        block_size: 128,
        restart_interval: 4,
    }
}

fn numbered_entries(count: usize) -> Vec<Entry> {
    (0..count)
        .map(|i| Entry::put(format!("key{:04}", i), format!("value{}", i), i as u64 + 1))
        .collect()
}

// =============================================================================
// Write & Open Tests
// =============================================================================

#[test]
fn test_write_then_open() {
    let (_temp, path) = setup_temp_table_path();
    let written = SSTable::write_data(&path, &numbered_entries(200), &small_blocks()).unwrap();

    assert!(written.block_count() > 1);
    assert_eq!(written.max_version(), 200);
    assert!(!path.with_extension("sstable.tmp").exists());

    let opened = SSTable::open(&path).unwrap();
    assert_eq!(opened.index(), written.index());
    assert_eq!(opened.max_version(), 200);
    assert_eq!(opened.file_size(), fs::metadata(&path).unwrap().len());
    assert_eq!(opened.first_key(), Some(&b"key0000"[..]));
}

#[test]
fn test_builder_rejects_unsorted_keys() {
    let (_temp, path) = setup_temp_table_path();
    let mut builder = SSTableBuilder::new(&path, small_blocks()).unwrap();
    builder.add(&Entry::put("b", "1", 1)).unwrap();

    assert!(matches!(
        builder.add(&Entry::put("a", "2", 2)),
        Err(RidgeError::Storage(_))
    ));
    assert!(matches!(
        builder.add(&Entry::put("b", "3", 3)),
        Err(RidgeError::Storage(_))
    ));
}

#[test]
fn test_empty_table() {
    let (_temp, path) = setup_temp_table_path();
    SSTable::write_data(&path, &[], &small_blocks()).unwrap();

    let table = SSTable::open(&path).unwrap();
    assert_eq!(table.block_count(), 0);
    assert_eq!(table.search(b"anything").unwrap(), None);
    assert!(table.get_all_entries().unwrap().is_empty());
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_search_across_blocks() {
    let (_temp, path) = setup_temp_table_path();
    let entries = numbered_entries(300);
    SSTable::write_data(&path, &entries, &small_blocks()).unwrap();
    let table = SSTable::open(&path).unwrap();

    for entry in entries.iter().step_by(7) {
        assert_eq!(table.search(&entry.key).unwrap().as_ref(), Some(entry));
    }
    assert_eq!(table.search(b"key").unwrap(), None);
    assert_eq!(table.search(b"key0150x").unwrap(), None);
    assert_eq!(table.search(b"zzz").unwrap(), None);
}

#[test]
fn test_tombstones_and_expiry_survive() {
    let (_temp, path) = setup_temp_table_path();
    let entries = vec![
        Entry::put("a", "alive", 5),
        Entry::tombstone("b", 9),
        Entry::put("c", "short-lived", 7).with_expiry(Some(1_700_000_000_000)),
        Entry::put("d", "", 3),
    ];
    SSTable::write_data(&path, &entries, &SSTableOptions::default()).unwrap();
    let table = SSTable::open(&path).unwrap();

    let b = table.search(b"b").unwrap().unwrap();
    assert!(b.tombstone);
    assert_eq!(b.value, None);
    assert_eq!(b.version, 9);

    let c = table.search(b"c").unwrap().unwrap();
    assert_eq!(c.expire_at, Some(1_700_000_000_000));

    assert_eq!(table.get_all_entries().unwrap(), entries);
}

#[test]
fn test_entries_in_range() {
    let (_temp, path) = setup_temp_table_path();
    SSTable::write_data(&path, &numbered_entries(300), &small_blocks()).unwrap();
    let table = SSTable::open(&path).unwrap();

    let found = table
        .entries_in_range(&KeyRange::new("key0100", "key0120"))
        .unwrap();
    let keys: Vec<String> = found
        .iter()
        .map(|e| String::from_utf8(e.key.clone()).unwrap())
        .collect();
    assert_eq!(keys.len(), 20);
    assert_eq!(keys.first().map(String::as_str), Some("key0100"));
    assert_eq!(keys.last().map(String::as_str), Some("key0119"));

    assert_eq!(table.entries_in_range(&KeyRange::all()).unwrap().len(), 300);
    assert!(table
        .entries_in_range(&KeyRange::new("x", "z"))
        .unwrap()
        .is_empty());
}

// =============================================================================
// Corruption & Race Tests
// =============================================================================

#[test]
fn test_bad_magic_rejected() {
    let (_temp, path) = setup_temp_table_path();
    SSTable::write_data(&path, &numbered_entries(10), &small_blocks()).unwrap();

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::End(-4)).unwrap();
    file.write_all(b"NOPE").unwrap();
    drop(file);

    assert!(matches!(SSTable::open(&path), Err(RidgeError::Storage(_))));
}

#[test]
fn test_index_checksum_mismatch_rejected() {
    let (_temp, path) = setup_temp_table_path();
    let table = SSTable::write_data(&path, &numbered_entries(50), &small_blocks()).unwrap();
    let index_offset = fs::metadata(&path).unwrap().len() - 24;

    // Damage the last byte of the index region
    let mut bytes = fs::read(&path).unwrap();
    bytes[index_offset as usize - 1] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert!(table.block_count() > 0);
    assert!(matches!(SSTable::open(&path), Err(RidgeError::Storage(_))));
}

#[test]
fn test_file_too_small() {
    let (_temp, path) = setup_temp_table_path();
    fs::write(&path, b"short").unwrap();
    assert!(matches!(SSTable::open(&path), Err(RidgeError::Storage(_))));
}

#[test]
fn test_corrupt_block_reads_as_absent() {
    let (_temp, path) = setup_temp_table_path();
    let table = SSTable::write_data(&path, &numbered_entries(50), &small_blocks()).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[2] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert_eq!(table.search(b"key0000").unwrap(), None);
    assert!(table.get_all_entries().unwrap_err().is_corruption());
}

#[test]
fn test_deleted_file_is_a_race() {
    let (_temp, path) = setup_temp_table_path();
    let table = SSTable::write_data(&path, &numbered_entries(10), &small_blocks()).unwrap();
    fs::remove_file(&path).unwrap();

    let err = table.search(b"key0001").unwrap_err();
    assert!(err.is_race());
    assert!(table.get_all_entries().unwrap_err().is_race());
}

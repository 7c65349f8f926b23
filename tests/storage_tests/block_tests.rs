//! Tests for prefix-compressed blocks
//!
//! These tests verify:
//! - Round trip of entries through builder and reader, across restart points
//! - Point lookups for present, absent, first and last keys
//! - Base version/expiry stored in the trailer
//! - Empty blocks
//! - Checksum and trailer corruption are detected
//! - Prefix compression beats a plain key/value layout on realistic keys

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ridgekv::codec::varint_len;
use ridgekv::storage::block::{Block, BlockBuilder};
use ridgekv::RidgeError;

// =============================================================================
// Helper Functions
// =============================================================================

fn build(entries: &[(Vec<u8>, Vec<u8>)], restart_interval: usize) -> Bytes {
    let mut builder = BlockBuilder::new(restart_interval);
    for (key, value) in entries {
        builder.add(key, value);
    }
    builder.finish()
}

fn user_entries(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..count)
        .map(|i| {
            (
                format!("user:{:05}", i).into_bytes(),
                format!("profile-{}", i).into_bytes(),
            )
        })
        .collect()
}

/// Sorted, deduplicated keys with long shared prefixes and random suffixes
fn random_entries(seed: u64, count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let tenants = ["acme", "globex", "initech"];
    let mut entries: Vec<(Vec<u8>, Vec<u8>)> = (0..count)
        .map(|_| {
            let tenant = tenants[rng.gen_range(0..tenants.len())];
            let key = format!("tenant/{}/order/{:08}", tenant, rng.gen_range(0..1_000_000u32));
            let value_len = rng.gen_range(0..48);
            let value: Vec<u8> = (0..value_len).map(|_| rng.gen()).collect();
            (key.into_bytes(), value)
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.dedup_by(|a, b| a.0 == b.0);
    entries
}

/// Size of the same entries stored with full keys and no restart array
fn plain_layout_size(entries: &[(Vec<u8>, Vec<u8>)]) -> usize {
    entries
        .iter()
        .map(|(k, v)| varint_len(k.len() as u64) + k.len() + varint_len(v.len() as u64) + v.len())
        .sum()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_round_trip_across_restarts() {
    let entries = user_entries(100);
    let block = Block::decode(build(&entries, 4)).unwrap();

    assert_eq!(block.len(), 100);
    let decoded = block.entries().unwrap();
    assert_eq!(decoded.len(), entries.len());
    for ((key, value), (dk, dv)) in entries.iter().zip(decoded.iter()) {
        assert_eq!(key, dk);
        assert_eq!(value.as_slice(), &dv[..]);
    }
}

#[test]
fn test_search_every_key() {
    let entries = user_entries(57);
    let block = Block::decode(build(&entries, 16)).unwrap();

    for (key, value) in &entries {
        let found = block.search(key).unwrap();
        assert_eq!(&found[..], value.as_slice());
    }
}

#[test]
fn test_search_absent_keys() {
    let entries = user_entries(20);
    let block = Block::decode(build(&entries, 4)).unwrap();

    assert_eq!(block.search(b"a"), None);
    assert_eq!(block.search(b"user:00005x"), None);
    assert_eq!(block.search(b"user:99999"), None);
    assert_eq!(block.search(b"zzz"), None);
}

#[test]
fn test_single_entry_block() {
    let entries = vec![(b"only".to_vec(), b"one".to_vec())];
    let block = Block::decode(build(&entries, 16)).unwrap();
    assert_eq!(block.len(), 1);
    assert_eq!(block.search(b"only").as_deref(), Some(&b"one"[..]));
}

#[test]
fn test_values_ending_in_continuation_bytes() {
    let entries = vec![
        (b"a".to_vec(), vec![0x80, 0x81]),
        (b"b".to_vec(), vec![0xFF]),
        (b"c".to_vec(), vec![0x90, 0x80, 0x80]),
    ];
    let block = Block::decode(build(&entries, 2)).unwrap();
    let decoded = block.entries().unwrap();
    assert_eq!(decoded.len(), 3);
    assert_eq!(&decoded[2].1[..], &[0x90, 0x80, 0x80]);
}

#[test]
fn test_base_values_in_trailer() {
    let mut builder = BlockBuilder::new(16);
    builder.set_base(42, 1_700_000_000_000);
    builder.add(b"k", b"v");
    let block = Block::decode(builder.finish()).unwrap();

    assert_eq!(block.base_version(), 42);
    assert_eq!(block.base_expire(), 1_700_000_000_000);
}

#[test]
fn test_empty_block() {
    let block = Block::decode(BlockBuilder::new(16).finish()).unwrap();
    assert!(block.is_empty());
    assert!(block.entries().unwrap().is_empty());
    assert_eq!(block.search(b"anything"), None);
}

#[test]
fn test_estimated_size_matches_output() {
    let entries = user_entries(33);
    let mut builder = BlockBuilder::new(8);
    for (key, value) in &entries {
        builder.add(key, value);
    }
    let estimate = builder.estimated_size();
    assert_eq!(builder.finish().len(), estimate);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_byte_fails_checksum() {
    let bytes = build(&user_entries(10), 4);
    let mut damaged = bytes.to_vec();
    damaged[3] ^= 0x01;

    let err = Block::decode(Bytes::from(damaged)).unwrap_err();
    assert!(matches!(err, RidgeError::CorruptBlock(_)));
}

#[test]
fn test_too_short_block() {
    let err = Block::decode(Bytes::from_static(&[0, 0, 0])).unwrap_err();
    assert!(err.is_corruption());
}

// =============================================================================
// Compression Tests
// =============================================================================

#[test]
fn test_prefix_compression_beats_plain_layout() {
    for seed in [1u64, 7, 42] {
        let entries = random_entries(seed, 500);
        let block = build(&entries, 16);

        assert!(
            block.len() < plain_layout_size(&entries),
            "seed {}: block {} bytes, plain {} bytes",
            seed,
            block.len(),
            plain_layout_size(&entries)
        );

        let decoded = Block::decode(block).unwrap().entries().unwrap();
        assert_eq!(decoded.len(), entries.len());
        for ((key, value), (dk, dv)) in entries.iter().zip(decoded.iter()) {
            assert_eq!(key, dk);
            assert_eq!(value.as_slice(), &dv[..]);
        }
    }
}

#[test]
fn test_random_lookups_match_dataset() {
    let entries = random_entries(99, 300);
    let block = Block::decode(build(&entries, 16)).unwrap();
    let mut rng = StdRng::seed_from_u64(5);

    for _ in 0..200 {
        let (key, value) = &entries[rng.gen_range(0..entries.len())];
        assert_eq!(block.search(key).as_deref(), Some(value.as_slice()));
    }
}

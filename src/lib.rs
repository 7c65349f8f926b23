//! # RidgeKV
//!
//! An embedded log-structured-merge key-value store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery that truncates torn log tails
//! - Prefix-compressed, CRC32C-checked SSTable blocks
//! - Leveled background compaction with newest-wins merging
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Engine (KeyValueStore)                       │
//! │         get / put / delete / flush / scan                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ writes serialized by write_lock
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │
//!   │  (Append)   │          │  (SkipMap)  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │ flush
//!                                   ▼
//!                   ┌───────────────────────────────┐
//!                   │  TableSet  level0 .. levelN   │◄──┐
//!                   │  (SSTables, newest first)     │   │ swap
//!                   └───────────────┬───────────────┘   │
//!                                   │                   │
//!                                   ▼                   │
//!                           ┌───────────────┐           │
//!                           │  Compaction   │───────────┘
//!                           │   (worker)    │
//!                           └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod types;

pub mod codec;
pub mod compaction;
pub mod engine;
pub mod memtable;
pub mod storage;
pub mod store;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, TombstonePolicy, WalSyncStrategy};
pub use engine::{Engine, EngineStats};
pub use error::{Result, RidgeError};
pub use store::KeyValueStore;
pub use types::{
    DeleteOptions, DeleteOutcome, Entry, KeyRange, PutOptions, PutOutcome, ReadOptions,
    ScanCursor, ValueRecord,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of RidgeKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

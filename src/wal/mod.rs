//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append a record before the memtable is mutated
//! - Sequence ids for ordering (and as write versions)
//! - Crash recovery and replay, truncating a torn tail
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Record 1 (all integers big-endian)                           │
//! │ ┌─────────┬────────────┬─────┬────────────┬───────┐          │
//! │ │ Seq (8) │ KeyLen (4) │ Key │ ValLen (4) │ Value │          │
//! │ └─────────┴────────────┴─────┴────────────┴───────┘          │
//! │ ┌───────────────┬────────┬───────────┬────────────────────┐  │
//! │ │ Tombstone (1) │ Op (1) │ Secs (8)  │ ExpireAt (8) if op=2│  │
//! │ └───────────────┴────────┴───────────┴────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Record 2 ...                                                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod entry;
mod recovery;
mod writer;

pub use entry::{OpType, WalRecord, RECORD_OVERHEAD};
pub use recovery::{replay, RecoveryResult};
pub use writer::FileWal;

use crate::error::Result;
use crate::types::Entry;

/// Durable, ordered log of mutations
pub trait WriteAheadLog: Send + Sync {
    /// Append `entry` and make it durable per the sync strategy.
    /// Returns the sequence id assigned to the record.
    fn write(&self, entry: &Entry, op_type: OpType) -> Result<u64>;

    /// Replay every valid record in file order
    fn recover(&self, apply: &mut dyn FnMut(WalRecord)) -> Result<RecoveryResult>;

    /// Discard all records
    fn clear(&self) -> Result<()>;

    /// Force buffered records to stable storage
    fn sync(&self) -> Result<()>;

    /// Make sure future sequence ids are greater than `sequence`
    fn resume_after(&self, sequence: u64);
}

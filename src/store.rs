//! Storage capability consumed by front ends (CLI, request handlers)

use crate::error::Result;
use crate::types::{
    DeleteOptions, DeleteOutcome, KeyRange, PutOptions, PutOutcome, ReadOptions, ScanCursor,
    ValueRecord,
};

/// The contract a key-value front end depends on
pub trait KeyValueStore: Send + Sync {
    /// Current live value for `key`
    fn get(&self, key: &[u8]) -> Result<Option<ValueRecord>>;

    fn put(&self, key: &[u8], value: &[u8], options: &PutOptions) -> Result<PutOutcome>;

    fn delete(&self, key: &[u8], options: &DeleteOptions) -> Result<DeleteOutcome>;

    /// Persist buffered writes to an SSTable
    fn flush(&self) -> Result<()>;

    /// Live entries in `range`, ascending
    fn scan(&self, range: KeyRange, options: &ReadOptions) -> Result<ScanCursor>;
}

//! Error types for RidgeKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using RidgeError
pub type Result<T> = std::result::Result<T, RidgeError>;

/// Unified error type for RidgeKV operations
#[derive(Debug, Error)]
pub enum RidgeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Directory uncreatable, file unwritable, etc. Fatal to the caller.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A table file vanished mid-read because compaction deleted it.
    #[error("SSTable vanished during read: {}", path.display())]
    IoRace { path: PathBuf },

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    /// A varint ran past its maximum byte length without terminating.
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// The source ran out of bytes before a value could be fully read.
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// A decoded field does not have the kind its position requires.
    #[error("Decode field mismatch: {0}")]
    DecodeFieldMismatch(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    /// Block trailer, restart metadata or checksum is inconsistent.
    #[error("Corrupt block: {0}")]
    CorruptBlock(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Compaction error: {0}")]
    Compaction(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Write Errors
    // -------------------------------------------------------------------------
    #[error("Version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RidgeError {
    /// Check if the error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RidgeError::CorruptBlock(_)
                | RidgeError::WalCorruption(_)
                | RidgeError::MalformedEncoding(_)
                | RidgeError::DecodeFieldMismatch(_)
        )
    }

    /// Check if the error is a read racing a concurrent compaction
    pub fn is_race(&self) -> bool {
        matches!(self, RidgeError::IoRace { .. })
    }

    /// Shorthand for a `Truncated` error
    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        RidgeError::Truncated { needed, available }
    }
}

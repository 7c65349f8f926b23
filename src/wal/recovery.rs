//! WAL Recovery
//!
//! Replays WAL bytes in file order and finds where the valid prefix ends.

use tracing::warn;

use super::WalRecord;

/// Result of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of records handed to the callback
    pub records_recovered: u64,

    /// Sequence id of the last good record (0 if none)
    pub last_sequence: u64,

    /// Bytes past the last good record that were cut off
    pub truncated_bytes: u64,
}

impl RecoveryResult {
    pub fn was_truncated(&self) -> bool {
        self.truncated_bytes > 0
    }
}

/// Decode records from `data` until it runs out or a record fails to parse.
///
/// Returns the result and the length of the valid prefix. A bad record stops
/// the replay; nothing after it is applied.
pub fn replay(data: &[u8], apply: &mut dyn FnMut(WalRecord)) -> (RecoveryResult, usize) {
    let mut result = RecoveryResult::default();
    let mut cursor = data;
    let mut valid = 0usize;

    while !cursor.is_empty() {
        match WalRecord::decode(&mut cursor) {
            Ok(record) => {
                valid = data.len() - cursor.len();
                result.records_recovered += 1;
                result.last_sequence = record.sequence_id;
                apply(record);
            }
            Err(e) => {
                warn!(
                    offset = valid,
                    discarded = data.len() - valid,
                    error = %e,
                    "stopping WAL replay at unreadable record"
                );
                break;
            }
        }
    }

    result.truncated_bytes = (data.len() - valid) as u64;
    (result, valid)
}

//! WAL Writer
//!
//! File-backed write-ahead log over a single `wal.log`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::recovery::{replay, RecoveryResult};
use super::{OpType, WalRecord, WriteAheadLog};
use crate::config::WalSyncStrategy;
use crate::error::Result;
use crate::types::Entry;

struct WalState {
    writer: BufWriter<File>,
    next_sequence: u64,
    /// Records appended since the last fsync
    unsynced: usize,
}

/// Appends records to the WAL file
///
/// Every operation takes the same lock, so appends, `clear` and `recover`
/// never interleave.
pub struct FileWal {
    path: PathBuf,
    sync_strategy: WalSyncStrategy,
    state: Mutex<WalState>,
}

impl FileWal {
    /// Open or create a WAL file
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            sync_strategy,
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                next_sequence: 1,
                unsynced: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence id the next write will receive
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().next_sequence
    }

    /// Current file length in bytes (buffered data included)
    pub fn len(&self) -> Result<u64> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        Ok(state.writer.get_ref().metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl WriteAheadLog for FileWal {
    fn write(&self, entry: &Entry, op_type: OpType) -> Result<u64> {
        let mut state = self.state.lock();
        let sequence_id = state.next_sequence;
        let record = WalRecord::new(sequence_id, entry, op_type, now_secs());

        let mut buf = Vec::with_capacity(record.encoded_len());
        record.encode(&mut buf);
        state.writer.write_all(&buf)?;
        state.writer.flush()?;

        match self.sync_strategy {
            WalSyncStrategy::EveryWrite => state.writer.get_ref().sync_data()?,
            WalSyncStrategy::EveryNEntries { count } => {
                state.unsynced += 1;
                if state.unsynced >= count {
                    state.writer.get_ref().sync_data()?;
                    state.unsynced = 0;
                }
            }
        }

        state.next_sequence += 1;
        Ok(sequence_id)
    }

    fn recover(&self, apply: &mut dyn FnMut(WalRecord)) -> Result<RecoveryResult> {
        let mut state = self.state.lock();
        state.writer.flush()?;

        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;

        let (result, valid) = replay(&data, apply);
        if result.was_truncated() {
            warn!(
                path = %self.path.display(),
                valid_bytes = valid,
                truncated_bytes = result.truncated_bytes,
                "truncating torn WAL tail"
            );
            let file = state.writer.get_ref();
            file.set_len(valid as u64)?;
            file.sync_all()?;
        }
        if result.records_recovered > 0 {
            info!(
                records = result.records_recovered,
                last_sequence = result.last_sequence,
                "recovered WAL records"
            );
        }

        state.next_sequence = state.next_sequence.max(result.last_sequence + 1);
        Ok(result)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;

        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&self.path)?;
        file.sync_all()?;
        drop(file);

        state.writer = BufWriter::new(open_append(&self.path)?);
        state.unsynced = 0;
        debug!(path = %self.path.display(), "cleared WAL");
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.writer.flush()?;
        state.writer.get_ref().sync_data()?;
        state.unsynced = 0;
        Ok(())
    }

    fn resume_after(&self, sequence: u64) {
        let mut state = self.state.lock();
        state.next_sequence = state.next_sequence.max(sequence + 1);
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn now_secs() -> i64 {
    crate::types::now_millis() / 1000
}

//! Compaction Worker
//!
//! A single background thread that runs compaction tasks in FIFO order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use super::{compact_level, needs_compaction, CompactionOutcome, CompactionSettings};
use crate::error::{Result, RidgeError};
use crate::storage::StorageManager;

/// Outcomes kept for callers that have not drained the channel yet
const OUTCOME_BUFFER: usize = 256;

/// Tasks submitted but not yet finished
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Handle to the compaction thread
///
/// Dropping the handle closes the queue and joins the thread after the
/// queued tasks finish.
pub struct CompactionWorker {
    sender: Option<Sender<u32>>,
    handle: Option<JoinHandle<()>>,
    pending: Arc<Pending>,
    outcomes: Receiver<CompactionOutcome>,
}

impl CompactionWorker {
    /// Start the worker thread
    pub fn spawn(storage: Arc<StorageManager>, settings: CompactionSettings) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<u32>();
        let (outcome_tx, outcome_rx) = channel::bounded(OUTCOME_BUFFER);
        let pending = Arc::new(Pending::default());

        let worker_pending = Arc::clone(&pending);
        let handle = thread::Builder::new()
            .name("ridgekv-compaction".into())
            .spawn(move || {
                for level in receiver.iter() {
                    run_task(&storage, &settings, level, &outcome_tx);
                    worker_pending.done();
                }
                debug!("compaction worker exiting");
            })
            .map_err(RidgeError::Io)?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            pending,
            outcomes: outcome_rx,
        })
    }

    /// Queue a compaction check for `level`
    pub fn submit(&self, level: u32) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| RidgeError::Compaction("compaction worker is shut down".into()))?;
        self.pending.add();
        if sender.send(level).is_err() {
            self.pending.done();
            return Err(RidgeError::Compaction(
                "compaction worker has stopped".into(),
            ));
        }
        Ok(())
    }

    /// Block until every submitted task has finished
    pub fn wait_idle(&self) {
        self.pending.wait_idle();
    }

    /// Receiver of task outcomes, oldest first
    pub fn outcomes(&self) -> Receiver<CompactionOutcome> {
        self.outcomes.clone()
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("compaction worker panicked");
            }
        }
    }
}

/// Compact `level`, then keep going down while the next level is due
fn run_task(
    storage: &Arc<StorageManager>,
    settings: &CompactionSettings,
    level: u32,
    outcomes: &Sender<CompactionOutcome>,
) {
    let mut level = level;
    loop {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            compact_level(storage, settings, level)
        }));
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(level, error = %e, "compaction failed");
                CompactionOutcome::Failed {
                    level,
                    error: e.to_string(),
                }
            }
            Err(_) => {
                error!(level, "compaction panicked");
                CompactionOutcome::Failed {
                    level,
                    error: "compaction panicked".into(),
                }
            }
        };

        let compacted = matches!(outcome, CompactionOutcome::Compacted { .. });
        if let Err(TrySendError::Full(dropped)) = outcomes.try_send(outcome) {
            debug!(?dropped, "outcome buffer full, dropping report");
        }

        if !compacted || !needs_compaction(storage, settings, level + 1) {
            break;
        }
        level += 1;
    }
}

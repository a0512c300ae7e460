// src/ledger/mod.rs

//! Run ledger: the durable record of which outputs this engine produced.
//!
//! An entry exists for `(task, output)` only after the output was renamed
//! into place by a succeeded instance. The staleness evaluator is the only
//! reader; the task runner records and invalidates.

pub mod file;
pub mod hash;
pub mod memory;

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::LedgerMode;

pub use file::FileLedger;
pub use hash::{compute_file_hash, fingerprint};
pub use memory::MemoryLedger;

/// Default location of the ledger file, relative to the pipeline root.
pub const DEFAULT_LEDGER_PATH: &str = ".pipedag/ledger.jsonl";

/// One completed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub task: String,
    /// Output path relative to the pipeline root.
    pub output: PathBuf,
    /// Modification time of the output when it was recorded (ns since epoch).
    pub modified_ns: u64,
    /// blake3 hex digest of the output contents.
    pub hash: String,
    /// Wall clock completion time (ms since epoch).
    pub completed_at_ms: u64,
}

impl LedgerEntry {
    pub fn new(task: impl Into<String>, output: impl Into<PathBuf>, modified_ns: u64, hash: String) -> Self {
        Self {
            task: task.into(),
            output: output.into(),
            modified_ns,
            hash,
            completed_at_ms: millis_since_epoch(SystemTime::now()),
        }
    }
}

/// Storage for ledger entries. Implementations must tolerate concurrent
/// callers: appends are serialised, lookups may run in parallel.
pub trait RunLedger: Send + Sync + Debug {
    fn record(&self, entry: LedgerEntry) -> Result<()>;
    fn query(&self, task: &str, output: &Path) -> Option<LedgerEntry>;
    fn invalidate(&self, task: &str, output: &Path) -> Result<()>;
    fn entries_for_task(&self, task: &str) -> Vec<LedgerEntry>;
}

/// Open the ledger selected by the pipeline configuration.
pub fn open_ledger(mode: LedgerMode, path: &Path) -> Result<Arc<dyn RunLedger>> {
    match mode {
        LedgerMode::File => Ok(Arc::new(FileLedger::open(path)?)),
        LedgerMode::Memory => Ok(Arc::new(MemoryLedger::new())),
    }
}

pub fn nanos_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

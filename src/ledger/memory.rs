// src/ledger/memory.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use tracing::debug;

use crate::ledger::{LedgerEntry, RunLedger};

/// Ledger kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: RwLock<HashMap<(String, PathBuf), LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RunLedger for MemoryLedger {
    fn record(&self, entry: LedgerEntry) -> Result<()> {
        debug!(task = %entry.task, output = ?entry.output, "recorded ledger entry (memory)");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((entry.task.clone(), entry.output.clone()), entry);
        Ok(())
    }

    fn query(&self, task: &str, output: &Path) -> Option<LedgerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(task.to_string(), output.to_path_buf()))
            .cloned()
    }

    fn invalidate(&self, task: &str, output: &Path) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(task.to_string(), output.to_path_buf()));
        Ok(())
    }

    fn entries_for_task(&self, task: &str) -> Vec<LedgerEntry> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<LedgerEntry> =
            guard.values().filter(|e| e.task == task).cloned().collect();
        entries.sort_by(|a, b| a.output.cmp(&b.output));
        entries
    }
}

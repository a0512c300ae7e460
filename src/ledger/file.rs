// src/ledger/file.rs

//! Append-only JSON-lines ledger.
//!
//! Every line is either a `record` (a completed output) or an `invalidate`
//! tombstone. The file is replayed into an in-memory index on open; later
//! lines win. A truncated trailing line (crash mid-append) is skipped.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::{LedgerEntry, RunLedger};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LedgerLine {
    Record(LedgerEntry),
    Invalidate { task: String, output: PathBuf },
}

type Index = HashMap<(String, PathBuf), LedgerEntry>;

#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    index: RwLock<Index>,
    writer: Mutex<File>,
}

impl FileLedger {
    /// Open (or create) the ledger at `path` and replay its contents.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating ledger directory {:?}", parent))?;
            }
        }

        let (index, torn_tail) = if path.exists() {
            replay(path)?
        } else {
            (HashMap::new(), false)
        };
        info!(path = ?path, entries = index.len(), "opened run ledger");

        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening ledger file {:?}", path))?;
        if torn_tail {
            // Terminate the partial line so the next append starts clean.
            writer.write_all(b"\n")?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            index: RwLock::new(index),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &LedgerLine) -> Result<()> {
        let mut text = serde_json::to_string(line).context("serialising ledger line")?;
        text.push('\n');

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("ledger writer lock poisoned"))?;
        writer
            .write_all(text.as_bytes())
            .with_context(|| format!("appending to ledger {:?}", self.path))?;
        writer.flush()?;
        writer
            .sync_data()
            .with_context(|| format!("syncing ledger {:?}", self.path))?;
        Ok(())
    }
}

/// Replay the ledger file. The flag reports a missing final newline.
fn replay(path: &Path) -> Result<(Index, bool)> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading ledger file {:?}", path))?;
    let torn_tail = !text.is_empty() && !text.ends_with('\n');
    let mut index = HashMap::new();

    for (lineno, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerLine>(trimmed) {
            Ok(LedgerLine::Record(entry)) => {
                index.insert((entry.task.clone(), entry.output.clone()), entry);
            }
            Ok(LedgerLine::Invalidate { task, output }) => {
                index.remove(&(task, output));
            }
            Err(e) => {
                warn!(path = ?path, line = lineno + 1, error = %e, "skipping unreadable ledger line");
            }
        }
    }

    Ok((index, torn_tail))
}

impl RunLedger for FileLedger {
    fn record(&self, entry: LedgerEntry) -> Result<()> {
        self.append(&LedgerLine::Record(entry.clone()))?;
        debug!(task = %entry.task, output = ?entry.output, "recorded ledger entry");
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((entry.task.clone(), entry.output.clone()), entry);
        Ok(())
    }

    fn query(&self, task: &str, output: &Path) -> Option<LedgerEntry> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(task.to_string(), output.to_path_buf()))
            .cloned()
    }

    fn invalidate(&self, task: &str, output: &Path) -> Result<()> {
        let key = (task.to_string(), output.to_path_buf());
        let present = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key);
        if !present {
            return Ok(());
        }

        self.append(&LedgerLine::Invalidate {
            task: task.to_string(),
            output: output.to_path_buf(),
        })?;
        debug!(task, output = ?output, "invalidated ledger entry");
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Ok(())
    }

    fn entries_for_task(&self, task: &str) -> Vec<LedgerEntry> {
        let guard = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<LedgerEntry> =
            guard.values().filter(|e| e.task == task).cloned().collect();
        entries.sort_by(|a, b| a.output.cmp(&b.output));
        entries
    }
}

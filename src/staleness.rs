// src/staleness.rs

//! Decides whether a task instance must run.
//!
//! An instance is `Fresh` only if every output exists, is backed by a ledger
//! entry whose fingerprint still matches, and is not older than any input.
//! A file that merely exists (dropped in by hand, or left behind by a crash)
//! never counts as built.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::ledger::{compute_file_hash, nanos_since_epoch, RunLedger};
use crate::types::TaskKind;

/// Why an instance has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    UpstreamRebuilt,
    NoOutputs,
    OutputMissing(PathBuf),
    NoLedgerEntry(PathBuf),
    OutputModified(PathBuf),
    LedgerOutputGone(PathBuf),
    InputNewer { input: PathBuf, output: PathBuf },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Forced => write!(f, "forced"),
            StaleReason::UpstreamRebuilt => write!(f, "upstream will be rebuilt"),
            StaleReason::NoOutputs => write!(f, "no outputs yet"),
            StaleReason::OutputMissing(p) => write!(f, "output {} missing", p.display()),
            StaleReason::NoLedgerEntry(p) => {
                write!(f, "output {} was not produced by a recorded run", p.display())
            }
            StaleReason::OutputModified(p) => {
                write!(f, "output {} changed since it was recorded", p.display())
            }
            StaleReason::LedgerOutputGone(p) => {
                write!(f, "recorded output {} no longer exists", p.display())
            }
            StaleReason::InputNewer { input, output } => write!(
                f,
                "input {} is newer than output {}",
                input.display(),
                output.display()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Fresh,
    Ready(StaleReason),
    MissingInputs(Vec<PathBuf>),
}

/// What the evaluator needs to know about one instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceFacts<'a> {
    pub task: &'a str,
    pub kind: TaskKind,
    pub inputs: &'a [PathBuf],
    pub outputs: &'a [PathBuf],
    /// Inputs some other instance in this run will produce.
    pub produced: &'a BTreeSet<PathBuf>,
    /// Whether every data dependency classified `Fresh`.
    pub upstream_fresh: bool,
    pub forced: bool,
}

/// Staleness evaluator bound to a filesystem, pipeline root and ledger.
pub struct Evaluator<'a> {
    fs: &'a dyn FileSystem,
    root: &'a Path,
    ledger: &'a dyn RunLedger,
}

impl<'a> Evaluator<'a> {
    pub fn new(fs: &'a dyn FileSystem, root: &'a Path, ledger: &'a dyn RunLedger) -> Self {
        Self { fs, root, ledger }
    }

    pub fn classify(&self, facts: &InstanceFacts<'_>) -> Result<Classification> {
        let missing: Vec<PathBuf> = facts
            .inputs
            .iter()
            .filter(|p| !facts.produced.contains(*p) && !self.fs.exists(&self.root.join(p)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Ok(Classification::MissingInputs(missing));
        }

        if facts.forced {
            return Ok(Classification::Ready(StaleReason::Forced));
        }
        if !facts.upstream_fresh {
            return Ok(Classification::Ready(StaleReason::UpstreamRebuilt));
        }
        if facts.outputs.is_empty() {
            return Ok(Classification::Ready(StaleReason::NoOutputs));
        }

        if facts.kind == TaskKind::Split {
            // A split is one unit: losing any of its recorded pieces means
            // the whole set has to be regenerated.
            for entry in self.ledger.entries_for_task(facts.task) {
                if !facts.outputs.contains(&entry.output) {
                    return Ok(Classification::Ready(StaleReason::LedgerOutputGone(
                        entry.output,
                    )));
                }
            }
        }

        let mut oldest_output: Option<(u64, &PathBuf)> = None;
        for output in facts.outputs {
            let abs = self.root.join(output);
            if !self.fs.exists(&abs) {
                return Ok(Classification::Ready(StaleReason::OutputMissing(output.clone())));
            }
            let Some(entry) = self.ledger.query(facts.task, output) else {
                return Ok(Classification::Ready(StaleReason::NoLedgerEntry(output.clone())));
            };
            let modified = nanos_since_epoch(self.fs.modified(&abs)?);
            if modified != entry.modified_ns {
                let hash = compute_file_hash(self.fs, &abs)?;
                if hash != entry.hash {
                    return Ok(Classification::Ready(StaleReason::OutputModified(
                        output.clone(),
                    )));
                }
                trace!(task = facts.task, output = ?output, "mtime changed but content matches");
            }
            if oldest_output.is_none_or(|(t, _)| modified < t) {
                oldest_output = Some((modified, output));
            }
        }

        if let Some((oldest, output)) = oldest_output {
            for input in facts.inputs {
                let abs = self.root.join(input);
                if !self.fs.exists(&abs) {
                    continue;
                }
                let modified = nanos_since_epoch(self.fs.modified(&abs)?);
                if modified > oldest {
                    return Ok(Classification::Ready(StaleReason::InputNewer {
                        input: input.clone(),
                        output: output.clone(),
                    }));
                }
            }
        }

        Ok(Classification::Fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::ledger::{fingerprint, LedgerEntry, MemoryLedger};

    fn record(fs: &MockFileSystem, ledger: &MemoryLedger, task: &str, path: &str) {
        let (modified_ns, hash) = fingerprint(fs, Path::new(path)).unwrap();
        ledger
            .record(LedgerEntry::new(task, path, modified_ns, hash))
            .unwrap();
    }

    fn facts<'a>(
        inputs: &'a [PathBuf],
        outputs: &'a [PathBuf],
        produced: &'a BTreeSet<PathBuf>,
    ) -> InstanceFacts<'a> {
        InstanceFacts {
            task: "A",
            kind: TaskKind::Transform,
            inputs,
            outputs,
            produced,
            upstream_fresh: true,
            forced: false,
        }
    }

    #[test]
    fn recorded_outputs_newer_than_inputs_are_fresh() {
        let fs = MockFileSystem::new();
        let ledger = MemoryLedger::new();
        fs.add_file("raw/x.txt", "x");
        fs.add_file("out/x.processed", "X");
        record(&fs, &ledger, "A", "out/x.processed");

        let inputs = vec![PathBuf::from("raw/x.txt")];
        let outputs = vec![PathBuf::from("out/x.processed")];
        let produced = BTreeSet::new();
        let eval = Evaluator::new(&fs, Path::new("."), &ledger);
        assert_eq!(
            eval.classify(&facts(&inputs, &outputs, &produced)).unwrap(),
            Classification::Fresh
        );
    }

    #[test]
    fn stray_output_without_ledger_entry_is_not_fresh() {
        let fs = MockFileSystem::new();
        let ledger = MemoryLedger::new();
        fs.add_file("raw/x.txt", "x");
        fs.add_file("out/x.processed", "dropped in by hand");

        let inputs = vec![PathBuf::from("raw/x.txt")];
        let outputs = vec![PathBuf::from("out/x.processed")];
        let produced = BTreeSet::new();
        let eval = Evaluator::new(&fs, Path::new("."), &ledger);
        assert!(matches!(
            eval.classify(&facts(&inputs, &outputs, &produced)).unwrap(),
            Classification::Ready(StaleReason::NoLedgerEntry(_))
        ));
    }

    #[test]
    fn touched_input_makes_instance_stale() {
        let fs = MockFileSystem::new();
        let ledger = MemoryLedger::new();
        fs.add_file("raw/x.txt", "x");
        fs.add_file("out/x.processed", "X");
        record(&fs, &ledger, "A", "out/x.processed");
        fs.add_file("raw/x.txt", "x2");

        let inputs = vec![PathBuf::from("raw/x.txt")];
        let outputs = vec![PathBuf::from("out/x.processed")];
        let produced = BTreeSet::new();
        let eval = Evaluator::new(&fs, Path::new("."), &ledger);
        assert!(matches!(
            eval.classify(&facts(&inputs, &outputs, &produced)).unwrap(),
            Classification::Ready(StaleReason::InputNewer { .. })
        ));
    }

    #[test]
    fn rewritten_output_with_same_content_stays_fresh_until_input_is_newer() {
        let fs = MockFileSystem::new();
        let ledger = MemoryLedger::new();
        fs.add_file("raw/x.txt", "x");
        fs.add_file("out/x.processed", "X");
        record(&fs, &ledger, "A", "out/x.processed");
        // Same bytes, newer mtime.
        fs.add_file("out/x.processed", "X");

        let inputs = vec![PathBuf::from("raw/x.txt")];
        let outputs = vec![PathBuf::from("out/x.processed")];
        let produced = BTreeSet::new();
        let eval = Evaluator::new(&fs, Path::new("."), &ledger);
        assert_eq!(
            eval.classify(&facts(&inputs, &outputs, &produced)).unwrap(),
            Classification::Fresh
        );

        fs.add_file("out/x.processed", "edited");
        assert!(matches!(
            eval.classify(&facts(&inputs, &outputs, &produced)).unwrap(),
            Classification::Ready(StaleReason::OutputModified(_))
        ));
    }

    #[test]
    fn missing_input_without_producer_is_reported() {
        let fs = MockFileSystem::new();
        let ledger = MemoryLedger::new();
        let inputs = vec![PathBuf::from("phenos.tsv"), PathBuf::from("out/x.processed")];
        let outputs = vec![PathBuf::from("result.txt")];
        let mut produced = BTreeSet::new();
        produced.insert(PathBuf::from("out/x.processed"));

        let eval = Evaluator::new(&fs, Path::new("."), &ledger);
        assert_eq!(
            eval.classify(&facts(&inputs, &outputs, &produced)).unwrap(),
            Classification::MissingInputs(vec![PathBuf::from("phenos.tsv")])
        );
    }

    #[test]
    fn split_with_a_lost_piece_is_stale() {
        let fs = MockFileSystem::new();
        let ledger = MemoryLedger::new();
        fs.add_file("reads", "r");
        fs.add_file("contigs/a.fa", "a");
        fs.add_file("contigs/b.fa", "b");
        record(&fs, &ledger, "S", "contigs/a.fa");
        record(&fs, &ledger, "S", "contigs/b.fa");

        let inputs = vec![PathBuf::from("reads")];
        let outputs = vec![PathBuf::from("contigs/a.fa")];
        let produced = BTreeSet::new();
        let eval = Evaluator::new(&fs, Path::new("."), &ledger);
        let f = InstanceFacts {
            task: "S",
            kind: TaskKind::Split,
            ..facts(&inputs, &outputs, &produced)
        };
        assert!(matches!(
            eval.classify(&f).unwrap(),
            Classification::Ready(StaleReason::LedgerOutputGone(_))
        ));
    }
}

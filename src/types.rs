// src/types.rs

//! Small enums shared by the config layer, the task model and the executor.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Match arity of a task.
///
/// - `Split`: one input selection, an a-priori unknown number of outputs.
/// - `Transform`: one instance per matched input, output name derived by
///   template substitution.
/// - `Merge`: every matched input collapsed into a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Split,
    Transform,
    Merge,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Split => "split",
            TaskKind::Transform => "transform",
            TaskKind::Merge => "merge",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "split" => Ok(TaskKind::Split),
            "transform" => Ok(TaskKind::Transform),
            "merge" => Ok(TaskKind::Merge),
            other => Err(format!(
                "invalid task kind: {other} (expected \"split\", \"transform\" or \"merge\")"
            )),
        }
    }
}

/// Where a task instance's unit of work is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Run in a local worker slot, inheriting the calling environment.
    #[default]
    Local,
    /// Submit to the external job queue and poll for completion.
    Cluster,
}

impl FromStr for ExecMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ExecMode::Local),
            "cluster" => Ok(ExecMode::Cluster),
            other => Err(format!(
                "invalid mode: {other} (expected \"local\" or \"cluster\")"
            )),
        }
    }
}

/// Storage used for the run ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// Append-only JSON-lines file (`.pipedag/ledger.jsonl` by default).
    #[default]
    File,
    /// In memory only (lost when the process exits).
    Memory,
}

// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use crate::exec::ClusterCommands;
use crate::ledger::DEFAULT_LEDGER_PATH;
use crate::types::{ExecMode, LedgerMode, TaskKind};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// concurrency = 4
/// default_target = "report"
///
/// [task.align]
/// kind = "transform"
/// input = "reads/*.fastq"
/// regex = '(?P<sample>[^/]+)\.fastq$'
/// output = "aligned/{sample}.bam"
/// cmd = ["aligner", "--threads", "{param:threads}", "{input}", "-o", "{output}"]
/// mode = "cluster"
/// cpus = 8
/// ```
///
/// This raw shape is what `serde` produces. Use `ConfigFile::try_from` (or
/// `config::load_and_validate`) to obtain a checked [`ConfigFile`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Batch scheduler commands; SLURM defaults when absent.
    #[serde(default)]
    pub cluster: Option<ClusterCommands>,

    /// All tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, RawTaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigSection {
    /// Instances that may run at the same time.
    pub concurrency: usize,
    /// Task built when no target is given on the command line.
    pub default_target: Option<String>,
    pub ledger: LedgerMode,
    /// Relative to the pipeline root.
    pub ledger_path: PathBuf,
    /// Resubmissions of a cluster job after a transient error.
    pub retries: u32,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    pub queue_timeout_secs: Option<u64>,
    /// Extra parameter files, relative to the pipeline root.
    pub params: Vec<PathBuf>,
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: 1,
            default_target: None,
            ledger: LedgerMode::default(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            retries: 2,
            poll_initial_ms: 500,
            poll_max_ms: 30_000,
            queue_timeout_secs: None,
            params: Vec::new(),
        }
    }
}

/// `[task.<name>]` section as written.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTaskConfig {
    /// `"split"`, `"transform"` or `"merge"`.
    pub kind: String,

    #[serde(default, deserialize_with = "one_or_many")]
    pub from: Vec<String>,

    /// Glob patterns or literal paths.
    #[serde(default, deserialize_with = "one_or_many")]
    pub input: Vec<String>,

    #[serde(default)]
    pub regex: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub add_inputs: Vec<String>,

    #[serde(default)]
    pub output: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub follows: Vec<String>,

    /// argv; every element is a template.
    #[serde(default)]
    pub cmd: Vec<String>,

    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub cpus: Option<u32>,

    #[serde(default)]
    pub memory: Option<String>,
}

/// Accept either `key = "a"` or `key = ["a", "b"]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so every task has a
/// known kind and mode, a command (unless it only `follows` other tasks) and
/// known references.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub cluster: ClusterCommands,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        cluster: ClusterCommands,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            config,
            cluster,
            task,
        }
    }
}

/// Checked `[task.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    pub kind: TaskKind,
    pub from: Vec<String>,
    pub input: Vec<String>,
    pub regex: Option<String>,
    pub add_inputs: Vec<String>,
    pub output: Option<String>,
    pub follows: Vec<String>,
    pub cmd: Vec<String>,
    pub mode: ExecMode,
    pub cpus: Option<u32>,
    pub memory: Option<String>,
}

// src/lib.rs

//! pipedag: a declarative file-pipeline executor.
//!
//! Tasks declare how their inputs map to outputs (split, transform, merge).
//! The engine infers dependencies from those patterns, decides which
//! instances are stale, and runs the stale ones locally or on a cluster,
//! resolving tasks downstream of a split once the split's outputs exist.

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod ledger;
pub mod logging;
pub mod pattern;
pub mod staleness;
pub mod task;
pub mod types;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::params::default_layers;
use crate::config::{config_root_dir, load_and_validate, pipeline_from_config, retry_policy};
use crate::dag::{InstanceState, ResolveContext, Scheduler};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent};
use crate::exec::{
    ClusterRunner, ExecContext, ExecutorBackend, RealExecutorBackend, ShellClusterClient,
    TouchExecutor,
};
use crate::fs::{FileSystem, RealFileSystem};
use crate::ledger::{open_ledger, MemoryLedger, RunLedger};
use crate::pattern::selector::STATE_DIR;

pub use crate::config::params::ParameterSet;
pub use crate::engine::RunSummary;
pub use crate::errors::{PipedagError, Result};
pub use crate::task::{BodyContext, NativeTask, PipelineBuilder, PipelineSpec, TaskSpec};
pub use crate::types::{ExecMode, LedgerMode, TaskKind};

/// Capacity of the runtime event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What to do with the stale instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Run task bodies.
    #[default]
    Execute,
    /// Classify only.
    DryRun,
    /// Refresh existing outputs instead of running bodies.
    Touch,
}

/// Everything besides the pipeline that a run needs.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Absolute pipeline root. Relative patterns resolve against it and
    /// bodies run in it.
    pub root: PathBuf,
    /// Empty means the pipeline's default targets.
    pub targets: Vec<String>,
    pub forced: BTreeSet<String>,
    pub concurrency: usize,
    pub mode: RunMode,
    pub force_local: bool,
    pub cluster: Option<ClusterRunner>,
    pub params: Arc<ParameterSet>,
    pub ledger: Arc<dyn RunLedger>,
    pub fs: Arc<dyn FileSystem>,
}

impl ExecuteOptions {
    /// Options for running against `root` with an in-memory ledger, one
    /// worker slot and no parameters.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            targets: Vec::new(),
            forced: BTreeSet::new(),
            concurrency: 1,
            mode: RunMode::Execute,
            force_local: false,
            cluster: None,
            params: Arc::new(ParameterSet::new()),
            ledger: Arc::new(MemoryLedger::new()),
            fs: Arc::new(RealFileSystem),
        }
    }

    pub fn target(mut self, task: impl Into<String>) -> Self {
        self.targets.push(task.into());
        self
    }

    pub fn force(mut self, task: impl Into<String>) -> Self {
        self.forced.insert(task.into());
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn params(mut self, params: ParameterSet) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn cluster(mut self, cluster: ClusterRunner) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn force_local(mut self, force_local: bool) -> Self {
        self.force_local = force_local;
        self
    }

    fn resolve_context(&self) -> ResolveContext {
        ResolveContext {
            fs: Arc::clone(&self.fs),
            root: self.root.clone(),
            ledger: Arc::clone(&self.ledger),
            forced: self.forced.clone(),
        }
    }

    fn exec_context(&self) -> ExecContext {
        let mut ctx = ExecContext::new(
            self.root.clone(),
            Arc::clone(&self.fs),
            Arc::clone(&self.ledger),
            Arc::clone(&self.params),
        )
        .with_concurrency(self.concurrency)
        .with_force_local(self.force_local);
        if let Some(cluster) = &self.cluster {
            ctx = ctx.with_cluster(cluster.clone());
        }
        ctx
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and parameter layers
/// - pipeline compilation and the run ledger
/// - scheduler / runtime / executor
/// - Ctrl-C handling
///
/// The summary is printed to stdout before returning.
pub async fn run(args: CliArgs) -> Result<RunSummary> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root = canonical_root(&config_path)?;
    info!(root = %root.display(), tasks = cfg.task.len(), "loaded pipeline");

    let cwd = std::env::current_dir()?;
    let mut explicit = args.params.clone();
    explicit.extend(cfg.config.params.iter().map(|p| root.join(p)));
    let params = ParameterSet::load_layers(&default_layers(&explicit, &root, &cwd))?;
    debug!(params = params.len(), "loaded parameters");

    let pipeline = pipeline_from_config(&cfg)?;

    let concurrency = args.jobs.unwrap_or(cfg.config.concurrency);
    if concurrency == 0 {
        return Err(PipedagError::ConfigError("--jobs must be >= 1".to_string()));
    }

    let ledger = open_ledger(cfg.config.ledger, &root.join(&cfg.config.ledger_path))?;
    let client = ShellClusterClient::new(cfg.cluster.clone(), root.join(STATE_DIR).join("jobs"));
    let cluster = ClusterRunner::new(Arc::new(client), retry_policy(&cfg.config));

    let mode = if args.dry_run {
        RunMode::DryRun
    } else if args.touch {
        RunMode::Touch
    } else {
        RunMode::Execute
    };

    let mut options = ExecuteOptions::new(root)
        .concurrency(concurrency)
        .mode(mode)
        .ledger(ledger)
        .params(params)
        .cluster(cluster)
        .force_local(args.local);
    options.targets.extend(args.target.clone());
    options.forced.extend(args.force.iter().cloned());

    if mode == RunMode::DryRun {
        let scheduler = Scheduler::new(pipeline, options.targets.clone(), options.resolve_context())?;
        print_plan(&scheduler);
        return Ok(RunSummary::from_scheduler(&scheduler));
    }

    let (tx, rx) = event_channel();

    // Ctrl-C → cancel the whole run.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let summary = execute_with_channel(pipeline, options, tx, rx).await?;
    print!("{summary}");
    Ok(summary)
}

/// Run `pipeline` programmatically.
pub async fn execute(pipeline: PipelineSpec, options: ExecuteOptions) -> Result<RunSummary> {
    let (tx, rx) = event_channel();
    execute_with_channel(pipeline, options, tx, rx).await
}

async fn execute_with_channel(
    pipeline: PipelineSpec,
    options: ExecuteOptions,
    tx: mpsc::Sender<RuntimeEvent>,
    rx: mpsc::Receiver<RuntimeEvent>,
) -> Result<RunSummary> {
    let scheduler = Scheduler::new(pipeline, options.targets.clone(), options.resolve_context())?;
    let ctx = Arc::new(options.exec_context());

    match options.mode {
        RunMode::DryRun => Ok(RunSummary::from_scheduler(&scheduler)),
        RunMode::Touch => drive(scheduler, rx, TouchExecutor::new(tx, ctx)).await,
        RunMode::Execute => drive(scheduler, rx, RealExecutorBackend::new(tx, ctx)).await,
    }
}

pub fn event_channel() -> (mpsc::Sender<RuntimeEvent>, mpsc::Receiver<RuntimeEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Drive `scheduler` to completion with an arbitrary executor backend.
pub async fn drive<E: ExecutorBackend>(
    scheduler: Scheduler,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
) -> Result<RunSummary> {
    let core = CoreRuntime::new(scheduler);
    Runtime::new(core, event_rx, executor).run().await
}

fn canonical_root(config_path: &Path) -> Result<PathBuf> {
    let root = config_root_dir(config_path);
    root.canonicalize().map_err(|e| {
        PipedagError::ConfigError(format!("pipeline root {}: {e}", root.display()))
    })
}

/// Dry-run output: every instance with its classification.
fn print_plan(scheduler: &Scheduler) {
    println!("pipedag dry-run");
    println!("  targets: {}", scheduler.targets().join(", "));
    println!();

    let mut current: Option<&str> = None;
    for inst in scheduler.instances() {
        if current != Some(inst.task.as_str()) {
            println!("{} ({}):", inst.task, inst.kind);
            current = Some(inst.task.as_str());
        }
        let state = match inst.state {
            InstanceState::Ready | InstanceState::Pending => "stale".to_string(),
            other => other.to_string(),
        };
        print!("  {state:<15} {}", inst.key());
        if let Some(reason) = &inst.reason {
            print!("  ({reason})");
        }
        if !inst.missing.is_empty() {
            let missing: Vec<String> = inst.missing.iter().map(|p| p.display().to_string()).collect();
            print!("  (missing {})", missing.join(", "));
        }
        println!();
    }

    for node in scheduler.deferred() {
        println!("{}: deferred ({:?})", node.task, node.state);
    }

    debug!("dry-run complete (no execution)");
}

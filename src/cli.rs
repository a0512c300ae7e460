// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::loader::DEFAULT_CONFIG_FILE;

/// Command-line arguments for `pipedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipedag",
    version,
    about = "Build file-based pipelines: split, transform and merge tasks run only when their outputs are stale.",
    long_about = None
)]
pub struct CliArgs {
    /// Task to build, together with everything upstream of it.
    ///
    /// Default: `[config].default_target`, else every task nothing depends on.
    #[arg(value_name = "TARGET")]
    pub target: Option<String>,

    /// Path to the pipeline file (TOML).
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Instances to run at the same time (overrides `[config].concurrency`).
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Resolve and classify every instance, print the plan, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Rebuild every instance of TASK even if it is up to date.
    #[arg(long, value_name = "TASK")]
    pub force: Vec<String>,

    /// Mark existing outputs as up to date instead of running task bodies.
    #[arg(long, conflicts_with = "dry_run")]
    pub touch: bool,

    /// Run cluster-mode tasks locally.
    #[arg(long)]
    pub local: bool,

    /// Parameter file; may be repeated, earlier files take precedence.
    #[arg(long, value_name = "PATH")]
    pub params: Vec<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

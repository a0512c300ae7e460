// src/exec/mod.rs

//! Execution layer.
//!
//! Runs scheduled instances and reports back to the orchestration runtime
//! via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the loop that hands instances to worker slots.
//! - [`task_runner`] runs one instance: staging, body, publication, ledger.
//! - [`local`] runs command and in-process bodies on this machine.
//! - [`cluster`] submits bodies to an external job queue;
//!   [`shell_cluster`] is the command-line client for it.
//! - [`backend`] provides the `ExecutorBackend` trait and the production
//!   `RealExecutorBackend`; [`touch`] is the `--touch` backend.

pub mod backend;
pub mod cancel;
pub mod cluster;
pub mod context;
pub mod executor_loop;
pub mod local;
pub mod locks;
pub mod shell_cluster;
pub mod task_runner;
pub mod touch;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use cancel::CancelSignal;
pub use cluster::{ClusterClient, ClusterRunner, JobSpec, JobStatus};
pub use context::{ExecContext, RetryPolicy};
pub use executor_loop::spawn_executor;
pub use locks::OutputLocks;
pub use shell_cluster::{ClusterCommands, ShellClusterClient};
pub use touch::TouchExecutor;

// src/exec/context.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::params::ParameterSet;
use crate::fs::FileSystem;
use crate::ledger::RunLedger;

use super::cluster::ClusterRunner;
use super::locks::OutputLocks;

/// Retry and polling knobs for cluster jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Resubmissions after a transient error (not counting the first try).
    pub retries: u32,
    pub poll_initial: Duration,
    pub poll_max: Duration,
    /// Treat a job that is still queued after this long as transient.
    pub queue_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            poll_initial: Duration::from_millis(500),
            poll_max: Duration::from_secs(30),
            queue_timeout: None,
        }
    }
}

/// Shared state every instance run needs.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Absolute pipeline root; bodies run with this as working directory.
    pub root: PathBuf,
    pub fs: Arc<dyn FileSystem>,
    pub ledger: Arc<dyn RunLedger>,
    pub params: Arc<ParameterSet>,
    /// Worker slots for concurrently running instances.
    pub concurrency: usize,
    pub cluster: Option<ClusterRunner>,
    /// Run cluster-mode tasks locally.
    pub force_local: bool,
    pub locks: OutputLocks,
}

impl ExecContext {
    pub fn new(
        root: PathBuf,
        fs: Arc<dyn FileSystem>,
        ledger: Arc<dyn RunLedger>,
        params: Arc<ParameterSet>,
    ) -> Self {
        Self {
            root,
            fs,
            ledger,
            params,
            concurrency: 1,
            cluster: None,
            force_local: false,
            locks: OutputLocks::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterRunner) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn with_force_local(mut self, force_local: bool) -> Self {
        self.force_local = force_local;
        self
    }
}

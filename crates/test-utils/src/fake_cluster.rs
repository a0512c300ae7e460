use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use pipedag::exec::cluster::BoxFuture;
use pipedag::exec::{ClusterClient, JobSpec, JobStatus};
use tokio::process::Command;

/// A cluster that shares the local filesystem: `submit` runs the job's argv
/// right away and polling reports its exit status.
///
/// - the first `fail_submits` submissions fail with a transient error
/// - every job reports `Pending` for `pending_polls` polls first
#[derive(Debug, Default)]
pub struct FakeClusterClient {
    pub fail_submits: AtomicUsize,
    pub pending_polls: usize,
    submitted: Mutex<Vec<JobSpec>>,
    cancelled: Mutex<Vec<String>>,
    jobs: Mutex<HashMap<String, (usize, JobStatus)>>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first_submits(n: usize) -> Self {
        Self {
            fail_submits: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<JobSpec> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl ClusterClient for FakeClusterClient {
    fn submit<'a>(&'a self, job: &'a JobSpec) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.submitted.lock().unwrap().push(job.clone());
            let remaining = self.fail_submits.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_submits.store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("queue temporarily unavailable"));
            }

            let (program, args) = job.argv.split_first().ok_or_else(|| anyhow!("empty argv"))?;
            let status = Command::new(program)
                .args(args)
                .current_dir(&job.workdir)
                .stdin(Stdio::null())
                .status()
                .await?;
            let result = if status.success() {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed(status.code().unwrap_or(1))
            };

            let mut jobs = self.jobs.lock().unwrap();
            let id = format!("fake-{}", jobs.len());
            jobs.insert(id.clone(), (self.pending_polls, result));
            Ok(id)
        })
    }

    fn poll<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, Result<JobStatus>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().unwrap();
            let (pending, result) = jobs
                .get_mut(job_id)
                .ok_or_else(|| anyhow!("unknown job {job_id}"))?;
            if *pending > 0 {
                *pending -= 1;
                return Ok(JobStatus::Pending);
            }
            Ok(*result)
        })
    }

    fn cancel<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.cancelled.lock().unwrap().push(job_id.to_string());
            Ok(())
        })
    }
}

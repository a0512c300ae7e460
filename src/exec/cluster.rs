// src/exec/cluster.rs

//! Cluster execution: submit a job to an external queue and poll it until
//! it reaches a terminal state.
//!
//! The queue itself is behind [`ClusterClient`]. [`ClusterRunner`] adds the
//! engine-side policy on top: polling with capped exponential backoff,
//! resubmission after transient errors, and cancellation.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::PipedagError;
use crate::task::Resources;

use super::cancel::CancelSignal;
use super::context::RetryPolicy;
use super::local::BodyResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of work handed to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    pub resources: Resources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(i32),
}

/// Client for an external job queue.
///
/// Errors returned from any method are treated as transient.
pub trait ClusterClient: Send + Sync + fmt::Debug {
    fn submit<'a>(&'a self, job: &'a JobSpec) -> BoxFuture<'a, anyhow::Result<String>>;
    fn poll<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, anyhow::Result<JobStatus>>;
    fn cancel<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

#[derive(Debug, Clone)]
pub struct ClusterRunner {
    client: Arc<dyn ClusterClient>,
    policy: RetryPolicy,
}

enum Attempt {
    Finished(BodyResult),
    Transient(String),
}

impl ClusterRunner {
    pub fn new(client: Arc<dyn ClusterClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `job` to completion.
    ///
    /// `cleanup` runs after every transient failure, before resubmitting, so
    /// partial outputs of the abandoned attempt never survive.
    pub async fn run(
        &self,
        job: &JobSpec,
        cancel: &mut CancelSignal,
        cleanup: &(dyn Fn() + Send + Sync),
    ) -> BodyResult {
        let mut attempt = 0u32;
        loop {
            match self.attempt(job, cancel).await {
                Attempt::Finished(result) => return result,
                Attempt::Transient(reason) => {
                    cleanup();
                    if attempt >= self.policy.retries {
                        let err = PipedagError::BackendTransient(format!(
                            "{reason} (gave up after {} attempts)",
                            attempt + 1
                        ));
                        return BodyResult::Failed(err.to_string());
                    }
                    attempt += 1;
                    warn!(job = %job.name, attempt, reason = %reason, "transient cluster error; resubmitting");
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.poll_initial) => {}
                        _ = cancel.cancelled() => return BodyResult::Cancelled,
                    }
                }
            }
        }
    }

    async fn attempt(&self, job: &JobSpec, cancel: &mut CancelSignal) -> Attempt {
        if cancel.is_cancelled() {
            return Attempt::Finished(BodyResult::Cancelled);
        }

        let job_id = match self.client.submit(job).await {
            Ok(id) => id,
            Err(e) => return Attempt::Transient(format!("submitting job failed: {e:#}")),
        };
        info!(job = %job.name, job_id = %job_id, "submitted cluster job");

        let submitted_at = Instant::now();
        let mut delay = self.policy.poll_initial;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    self.cancel_job(&job_id).await;
                    return Attempt::Finished(BodyResult::Cancelled);
                }
            }

            let status = match self.client.poll(&job_id).await {
                Ok(status) => status,
                Err(e) => {
                    self.cancel_job(&job_id).await;
                    return Attempt::Transient(format!("polling job {job_id} failed: {e:#}"));
                }
            };
            debug!(job_id = %job_id, ?status, "polled cluster job");

            match status {
                JobStatus::Succeeded => return Attempt::Finished(BodyResult::Succeeded),
                JobStatus::Failed(code) => {
                    return Attempt::Finished(BodyResult::Failed(format!(
                        "cluster job {job_id} exited with code {code}"
                    )));
                }
                JobStatus::Pending => {
                    if let Some(limit) = self.policy.queue_timeout {
                        if submitted_at.elapsed() >= limit {
                            self.cancel_job(&job_id).await;
                            return Attempt::Transient(format!(
                                "job {job_id} still queued after {limit:?}"
                            ));
                        }
                    }
                }
                JobStatus::Running => {}
            }

            delay = next_delay(delay, self.policy.poll_max);
        }
    }

    async fn cancel_job(&self, job_id: &str) {
        if let Err(e) = self.client.cancel(job_id).await {
            warn!(job_id = %job_id, error = %e, "failed to cancel cluster job");
        }
    }
}

/// Doubling backoff capped at `max`.
fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

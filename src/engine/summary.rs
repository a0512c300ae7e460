// src/engine/summary.rs

//! End-of-run report.

use std::fmt;
use std::time::Duration;

use crate::dag::{DeferredState, InstanceState, Scheduler};
use crate::task::TaskName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceReport {
    pub task: TaskName,
    pub key: String,
    pub state: InstanceState,
    /// Failure reason, cancellation cause or missing inputs.
    pub detail: Option<String>,
    pub elapsed: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredReport {
    pub task: TaskName,
    pub state: DeferredState,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub instances: Vec<InstanceReport>,
    pub deferred: Vec<DeferredReport>,
    pub cancelled_by_user: bool,
}

impl RunSummary {
    pub fn from_scheduler(scheduler: &Scheduler) -> Self {
        let instances = scheduler
            .instances()
            .iter()
            .map(|inst| {
                let detail = match inst.state {
                    InstanceState::MissingInputs => Some(format!(
                        "missing {}",
                        inst.missing
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                    _ => inst.failure.clone(),
                };
                let elapsed = match (inst.started_at, inst.finished_at) {
                    (Some(s), Some(f)) => Some(f.saturating_duration_since(s)),
                    _ => None,
                };
                InstanceReport {
                    task: inst.task.clone(),
                    key: inst.key(),
                    state: inst.state,
                    detail,
                    elapsed,
                }
            })
            .collect();

        let deferred = scheduler
            .deferred()
            .map(|d| DeferredReport {
                task: d.task.clone(),
                state: d.state.clone(),
            })
            .collect();

        Self {
            instances,
            deferred,
            cancelled_by_user: scheduler.cancelled_by_user(),
        }
    }

    pub fn count(&self, state: InstanceState) -> usize {
        self.instances.iter().filter(|i| i.state == state).count()
    }

    /// Instances whose body actually ran in this run.
    pub fn executed(&self) -> usize {
        self.count(InstanceState::Succeeded) + self.count(InstanceState::Failed)
    }

    pub fn of_task<'a>(&'a self, task: &'a str) -> impl Iterator<Item = &'a InstanceReport> + 'a {
        self.instances.iter().filter(move |i| i.task == task)
    }

    /// No failures, no missing inputs, nothing cancelled.
    pub fn is_success(&self) -> bool {
        !self.cancelled_by_user
            && self.instances.iter().all(|i| {
                !matches!(
                    i.state,
                    InstanceState::Failed | InstanceState::Cancelled | InstanceState::MissingInputs
                )
            })
            && self
                .deferred
                .iter()
                .all(|d| matches!(d.state, DeferredState::Waiting(_)))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = [
            InstanceState::Succeeded,
            InstanceState::Fresh,
            InstanceState::Failed,
            InstanceState::Cancelled,
            InstanceState::MissingInputs,
        ];
        writeln!(
            f,
            "pipedag summary: {} succeeded, {} fresh, {} failed, {} cancelled, {} missing inputs",
            self.count(InstanceState::Succeeded),
            self.count(InstanceState::Fresh),
            self.count(InstanceState::Failed),
            self.count(InstanceState::Cancelled),
            self.count(InstanceState::MissingInputs),
        )?;
        for state in order {
            for inst in self.instances.iter().filter(|i| i.state == state) {
                write!(f, "  {:<15} {:<20} {}", state.to_string(), inst.task, inst.key)?;
                if let Some(detail) = &inst.detail {
                    write!(f, "  ({detail})")?;
                }
                writeln!(f)?;
            }
        }
        for node in &self.deferred {
            match &node.state {
                DeferredState::Waiting(on) => {
                    writeln!(f, "  {:<15} {:<20} waiting on {}", "deferred", node.task, on.join(", "))?
                }
                DeferredState::Cancelled => {
                    writeln!(f, "  {:<15} {:<20} upstream split did not succeed", "cancelled", node.task)?
                }
                DeferredState::Failed(reason) => {
                    writeln!(f, "  {:<15} {:<20} {}", "failed", node.task, reason)?
                }
            }
        }
        if self.cancelled_by_user {
            writeln!(f, "run was cancelled")?;
        }
        Ok(())
    }
}

// src/dag/instance.rs

//! Task instances: a task materialised against concrete paths.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::pattern::{path_str, Captures};
use crate::staleness::StaleReason;
use crate::task::{TaskName, TaskSpec};
use crate::types::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-run state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Must run, but some dependency has not reached a terminal state.
    Pending,
    /// A required input does not exist and nothing will produce it.
    MissingInputs,
    /// Must run and every dependency is satisfied.
    Ready,
    /// Handed to the executor.
    Running,
    /// Up to date; nothing to do.
    Fresh,
    Succeeded,
    Failed,
    /// Never dispatched (or killed) because an upstream failed or the run
    /// was cancelled.
    Cancelled,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceState::MissingInputs
                | InstanceState::Fresh
                | InstanceState::Succeeded
                | InstanceState::Failed
                | InstanceState::Cancelled
        )
    }

    /// Terminal and its outputs are usable downstream.
    pub fn is_satisfied(self) -> bool {
        matches!(self, InstanceState::Fresh | InstanceState::Succeeded)
    }

    /// Terminal without usable outputs.
    pub fn is_broken(self) -> bool {
        matches!(
            self,
            InstanceState::MissingInputs | InstanceState::Failed | InstanceState::Cancelled
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::MissingInputs => "missing-inputs",
            InstanceState::Ready => "ready",
            InstanceState::Running => "running",
            InstanceState::Fresh => "fresh",
            InstanceState::Succeeded => "succeeded",
            InstanceState::Failed => "failed",
            InstanceState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub id: InstanceId,
    pub task: TaskName,
    pub kind: TaskKind,
    pub inputs: Vec<PathBuf>,
    /// Planned outputs; for a split, the outputs discovered so far.
    pub outputs: Vec<PathBuf>,
    pub captures: Captures,
    /// Instances producing one of our inputs.
    pub data_deps: BTreeSet<InstanceId>,
    /// Instances of `follows` prerequisites.
    pub order_deps: BTreeSet<InstanceId>,
    pub dependents: BTreeSet<InstanceId>,
    pub state: InstanceState,
    pub reason: Option<StaleReason>,
    pub missing: Vec<PathBuf>,
    pub failure: Option<String>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl TaskInstance {
    pub fn deps(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.data_deps.iter().chain(self.order_deps.iter()).copied()
    }

    /// Human readable identity: its outputs, or the task name for a split
    /// that has not produced anything yet and for an aggregate.
    pub fn key(&self) -> String {
        if self.outputs.is_empty() && self.kind == TaskKind::Split {
            format!("{} (no outputs yet)", self.task)
        } else if self.outputs.is_empty() {
            self.task.clone()
        } else {
            self.outputs
                .iter()
                .map(|p| path_str(p))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// An instance the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledInstance {
    pub id: InstanceId,
    pub task: TaskName,
    pub kind: TaskKind,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub captures: Captures,
    pub spec: Arc<TaskSpec>,
}

impl ScheduledInstance {
    pub fn from_instance(inst: &TaskInstance, spec: Arc<TaskSpec>) -> Self {
        Self {
            id: inst.id,
            task: inst.task.clone(),
            kind: inst.kind,
            inputs: inst.inputs.clone(),
            outputs: inst.outputs.clone(),
            captures: inst.captures.clone(),
            spec,
        }
    }
}

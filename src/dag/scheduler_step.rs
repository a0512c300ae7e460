// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::instance::{InstanceId, ScheduledInstance};
use crate::task::TaskName;

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the graph and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Instances that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledInstance>,
    /// Instances cancelled because of an upstream failure in this step.
    pub newly_cancelled: Vec<InstanceId>,
    /// Deferred tasks that were resolved into instances in this step.
    pub newly_resolved: Vec<TaskName>,
    /// Whether the run has drained after this step.
    pub run_just_finished: bool,
}

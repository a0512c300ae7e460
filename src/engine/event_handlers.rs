// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};

use crate::dag::{InstanceId, ScheduledInstance, Scheduler};
use crate::engine::InstanceOutcome;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these instances to the executor.
    DispatchInstances(Vec<ScheduledInstance>),
    /// Kill the backend jobs of these running instances.
    CancelRunning(Vec<InstanceId>),
    /// The run has drained; the shell should stop.
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn with_exit_check(mut commands: Vec<CoreCommand>, scheduler: &Scheduler) -> Self {
        let finished = scheduler.is_finished();
        if finished {
            commands.push(CoreCommand::RequestExit);
        }
        Self {
            commands,
            keep_running: !finished,
        }
    }
}

/// Seed the run: dispatch everything that is ready at startup.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let mut commands = Vec::new();
    let ready = scheduler.collect_ready();
    info!(ready = ready.len(), "starting run");
    if !ready.is_empty() {
        commands.push(CoreCommand::DispatchInstances(ready));
    }
    CoreStep::with_exit_check(commands, scheduler)
}

pub fn handle_instance_started(scheduler: &mut Scheduler, id: InstanceId) -> CoreStep {
    scheduler.handle_started(id);
    CoreStep {
        commands: Vec::new(),
        keep_running: true,
    }
}

/// Record a terminal status and dispatch whatever became ready.
pub fn handle_instance_completion(
    scheduler: &mut Scheduler,
    id: InstanceId,
    outcome: InstanceOutcome,
) -> CoreStep {
    let mut commands = Vec::new();

    let newly_ready = scheduler.handle_completion(id, outcome);
    if !newly_ready.is_empty() {
        commands.push(CoreCommand::DispatchInstances(newly_ready));
    }

    CoreStep::with_exit_check(commands, scheduler)
}

/// Cancel everything. The loop keeps running until the running instances
/// have reported back.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    let running = scheduler.cancel_all();
    debug!(running = running.len(), "shutdown requested");

    let mut commands = Vec::new();
    if !running.is_empty() {
        commands.push(CoreCommand::CancelRunning(running));
    }
    CoreStep::with_exit_check(commands, scheduler)
}

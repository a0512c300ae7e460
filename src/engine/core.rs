// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledInstance`s to the executor
//! - relaying cancellation to the executor
//!
//! The core never spawns processes or touches channels, so it can be unit
//! tested without Tokio.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_instance_completion, handle_instance_started, handle_shutdown, handle_start, CoreStep,
};
use crate::engine::summary::RunSummary;
use crate::engine::RuntimeEvent;

#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Whether the run has drained (for tests).
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Commands for the initial dispatch.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::InstanceStarted { id } => {
                handle_instance_started(&mut self.scheduler, id)
            }
            RuntimeEvent::InstanceCompleted { id, outcome } => {
                handle_instance_completion(&mut self.scheduler, id, outcome)
            }
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.scheduler),
        }
    }

    pub fn summary(&self) -> RunSummary {
        self.scheduler.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::dag::ResolveContext;
    use crate::engine::{CoreCommand, InstanceOutcome};
    use crate::fs::mock::MockFileSystem;
    use crate::ledger::MemoryLedger;
    use crate::task::{PipelineBuilder, TaskSpec};

    fn core_with(files: &[&str]) -> CoreRuntime {
        let fs = MockFileSystem::new();
        for f in files {
            fs.add_file(f, *f);
        }
        let pipeline = PipelineBuilder::new()
            .task(
                TaskSpec::transform("A")
                    .input("raw/*.txt")
                    .output("out/{stem}.processed")
                    .command(["true"]),
            )
            .build()
            .unwrap();
        let ctx = ResolveContext {
            fs: Arc::new(fs),
            root: PathBuf::from("."),
            ledger: Arc::new(MemoryLedger::new()),
            forced: BTreeSet::new(),
        };
        CoreRuntime::new(Scheduler::new(pipeline, vec![], ctx).unwrap())
    }

    fn dispatched(step: &CoreStep) -> Vec<crate::dag::ScheduledInstance> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchInstances(v) => Some(v.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn empty_pipeline_run_exits_immediately() {
        let mut core = core_with(&[]);
        let step = core.start();
        assert!(!step.keep_running);
        assert!(matches!(step.commands.as_slice(), [CoreCommand::RequestExit]));
    }

    #[test]
    fn run_exits_after_last_completion() {
        let mut core = core_with(&["raw/x.txt", "raw/y.txt"]);
        let step = core.start();
        let ready = dispatched(&step);
        assert_eq!(ready.len(), 2);
        assert!(step.keep_running);

        let step = core.step(RuntimeEvent::InstanceCompleted {
            id: ready[0].id,
            outcome: InstanceOutcome::Succeeded(ready[0].outputs.clone()),
        });
        assert!(step.keep_running);

        let step = core.step(RuntimeEvent::InstanceCompleted {
            id: ready[1].id,
            outcome: InstanceOutcome::Succeeded(ready[1].outputs.clone()),
        });
        assert!(!step.keep_running);
        assert!(core.summary().is_success());
    }

    #[test]
    fn shutdown_cancels_running_instances() {
        let mut core = core_with(&["raw/x.txt"]);
        let ready = dispatched(&core.start());

        let step = core.step(RuntimeEvent::ShutdownRequested);
        assert!(step.keep_running);
        assert!(matches!(
            step.commands.as_slice(),
            [CoreCommand::CancelRunning(ids)] if ids == &vec![ready[0].id]
        ));

        let step = core.step(RuntimeEvent::InstanceCompleted {
            id: ready[0].id,
            outcome: InstanceOutcome::Cancelled,
        });
        assert!(!step.keep_running);
        assert!(!core.summary().is_success());
    }
}

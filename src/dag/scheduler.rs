// src/dag/scheduler.rs

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dag::instance::{InstanceId, InstanceState, ScheduledInstance, TaskInstance};
use crate::dag::resolver::{DeferredNode, DeferredState, InstanceGraph, ResolveContext};
use crate::dag::scheduler_step::SchedulerStep;
use crate::engine::summary::RunSummary;
use crate::engine::InstanceOutcome;
use crate::errors::{PipedagError, Result};
use crate::task::{PipelineSpec, TaskName};
use crate::types::TaskKind;

/// Scheduler holds the immutable pipeline plus the mutable instance graph
/// of a single run.
///
/// It is responsible for:
/// - resolving tasks (again after every split completes)
/// - deciding when an instance is ready (all dependencies terminal and
///   satisfied)
/// - recording outcomes and cancelling everything downstream of a failure
/// - knowing when the run has drained
#[derive(Debug)]
pub struct Scheduler {
    pipeline: PipelineSpec,
    targets: Vec<TaskName>,
    closure: BTreeSet<TaskName>,
    ctx: ResolveContext,
    graph: InstanceGraph,
    cancelled_by_user: bool,
}

impl Scheduler {
    /// Build the initial instance graph for `targets` (and everything they
    /// depend on). Resolution errors abort here, before anything runs.
    pub fn new(pipeline: PipelineSpec, targets: Vec<TaskName>, ctx: ResolveContext) -> Result<Self> {
        let targets = if targets.is_empty() {
            pipeline.default_targets()
        } else {
            targets
        };
        for t in targets.iter().chain(ctx.forced.iter()) {
            if !pipeline.graph.contains(t) {
                return Err(PipedagError::TaskNotFound(t.clone()));
            }
        }

        let closure = pipeline.graph.upstream_closure(&targets);
        info!(?targets, tasks = closure.len(), "building instance graph");

        let mut graph = InstanceGraph::new();
        graph.resolve_pending(&pipeline, &closure, &ctx, true)?;

        let mut scheduler = Self {
            pipeline,
            targets,
            closure,
            ctx,
            graph,
            cancelled_by_user: false,
        };
        scheduler.promote_ready();
        Ok(scheduler)
    }

    pub fn targets(&self) -> &[TaskName] {
        &self.targets
    }

    pub fn pipeline(&self) -> &PipelineSpec {
        &self.pipeline
    }

    pub fn instances(&self) -> &[TaskInstance] {
        self.graph.instances()
    }

    pub fn instance(&self, id: InstanceId) -> Option<&TaskInstance> {
        self.graph.get(id)
    }

    pub fn instances_of(&self, task: &str) -> Vec<&TaskInstance> {
        self.graph.instances_of(task).collect()
    }

    pub fn deferred(&self) -> impl Iterator<Item = &DeferredNode> {
        self.graph.deferred()
    }

    /// Read-only view of the given instance's state.
    pub fn state_of(&self, id: InstanceId) -> Option<InstanceState> {
        self.graph.get(id).map(|i| i.state)
    }

    pub fn cancelled_by_user(&self) -> bool {
        self.cancelled_by_user
    }

    /// Nothing is pending, ready or running, and no task waits for
    /// resolution.
    pub fn is_finished(&self) -> bool {
        !self.has_active_instances() && !self.graph.deferred().any(DeferredNode::is_waiting)
    }

    fn has_active_instances(&self) -> bool {
        self.graph.instances().iter().any(|i| {
            matches!(
                i.state,
                InstanceState::Pending | InstanceState::Ready | InstanceState::Running
            )
        })
    }

    /// Collect instances that are ready, mark them `Running` and return them.
    pub fn collect_ready(&mut self) -> Vec<ScheduledInstance> {
        if self.cancelled_by_user {
            return Vec::new();
        }
        self.promote_ready();

        let ready: Vec<InstanceId> = self
            .graph
            .instances()
            .iter()
            .filter(|i| i.state == InstanceState::Ready)
            .map(|i| i.id)
            .collect();

        let mut scheduled = Vec::with_capacity(ready.len());
        for id in ready {
            let Some(inst) = self.graph.get_mut(id) else {
                continue;
            };
            let Some(spec) = self.pipeline.task(&inst.task).cloned() else {
                continue;
            };
            info!(
                task = %inst.task,
                instance = %id,
                outputs = %inst.key(),
                reason = %inst.reason.as_ref().map(|r| r.to_string()).unwrap_or_default(),
                "dispatching instance"
            );
            inst.state = InstanceState::Running;
            scheduled.push(ScheduledInstance::from_instance(inst, spec));
        }
        scheduled
    }

    /// Pending instances whose dependencies are all satisfied become `Ready`.
    fn promote_ready(&mut self) {
        let candidates: Vec<InstanceId> = self
            .graph
            .instances()
            .iter()
            .filter(|i| i.state == InstanceState::Pending)
            .filter(|i| {
                i.deps().all(|d| {
                    self.graph
                        .get(d)
                        .is_some_and(|dep| dep.state.is_satisfied())
                })
            })
            .map(|i| i.id)
            .collect();

        for id in candidates {
            if let Some(inst) = self.graph.get_mut(id) {
                debug!(task = %inst.task, instance = %id, "dependencies satisfied; marking Ready");
                inst.state = InstanceState::Ready;
            }
        }
    }

    pub fn handle_started(&mut self, id: InstanceId) {
        if let Some(inst) = self.graph.get_mut(id) {
            inst.started_at = Some(Instant::now());
            debug!(task = %inst.task, instance = %id, "instance started");
        }
    }

    /// Handle completion of an instance (production API).
    pub fn handle_completion(
        &mut self,
        id: InstanceId,
        outcome: InstanceOutcome,
    ) -> Vec<ScheduledInstance> {
        self.step_completion(id, outcome).newly_scheduled
    }

    /// Manual-step variant of `handle_completion` that returns a rich
    /// [`SchedulerStep`].
    pub fn step_completion(&mut self, id: InstanceId, outcome: InstanceOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(inst) = self.graph.get_mut(id) else {
            warn!(instance = %id, "completion for unknown instance; ignoring");
            return step;
        };
        if inst.state != InstanceState::Running {
            warn!(
                task = %inst.task,
                instance = %id,
                state = %inst.state,
                "completion for instance that is not running; ignoring"
            );
            return step;
        }
        inst.finished_at = Some(Instant::now());
        let task = inst.task.clone();
        let kind = inst.kind;

        match outcome {
            InstanceOutcome::Succeeded(outputs) => {
                inst.state = InstanceState::Succeeded;
                info!(task = %task, instance = %id, "instance succeeded");
                if kind == TaskKind::Split {
                    self.graph.set_split_outputs(id, outputs);
                }
            }
            InstanceOutcome::Failed(reason) => {
                warn!(
                    task = %task,
                    instance = %id,
                    reason = %reason,
                    "instance failed; cancelling dependents"
                );
                inst.state = InstanceState::Failed;
                inst.failure = Some(reason);
                step.newly_cancelled = self.cancel_dependents(id);
            }
            InstanceOutcome::Cancelled => {
                info!(task = %task, instance = %id, "instance cancelled");
                inst.state = InstanceState::Cancelled;
                step.newly_cancelled = self.cancel_dependents(id);
            }
        }

        if !self.cancelled_by_user {
            // Errors are recorded on the deferred node in non-strict mode.
            if let Ok(resolved) =
                self.graph
                    .resolve_pending(&self.pipeline, &self.closure, &self.ctx, false)
            {
                step.newly_resolved = resolved;
            }
            step.newly_scheduled = self.collect_ready();
        }

        if !self.has_active_instances() {
            self.abandon_waiting();
        }
        step.run_just_finished = self.is_finished();
        step
    }

    /// Mark every transitive dependent that has not started as `Cancelled`.
    fn cancel_dependents(&mut self, failed: InstanceId) -> Vec<InstanceId> {
        let mut stack: Vec<InstanceId> = self
            .graph
            .get(failed)
            .map(|i| i.dependents.iter().copied().collect())
            .unwrap_or_default();
        let failed_task = self
            .graph
            .get(failed)
            .map(|i| i.task.clone())
            .unwrap_or_default();
        let mut cancelled = Vec::new();

        while let Some(id) = stack.pop() {
            let Some(inst) = self.graph.get_mut(id) else {
                continue;
            };
            if matches!(inst.state, InstanceState::Pending | InstanceState::Ready) {
                debug!(
                    task = %inst.task,
                    instance = %id,
                    "cancelling instance due to upstream failure"
                );
                inst.state = InstanceState::Cancelled;
                inst.failure = Some(format!("upstream {failed_task} ({failed}) did not complete"));
                cancelled.push(id);
                stack.extend(inst.dependents.iter().copied());
            }
        }

        cancelled
    }

    /// Cancel the whole run: nothing new is dispatched, every instance that
    /// has not started is cancelled. Returns the instances still running;
    /// their backend jobs must be killed.
    pub fn cancel_all(&mut self) -> Vec<InstanceId> {
        self.cancelled_by_user = true;
        let mut running = Vec::new();

        let ids: Vec<InstanceId> = self.graph.instances().iter().map(|i| i.id).collect();
        for id in ids {
            let Some(inst) = self.graph.get_mut(id) else {
                continue;
            };
            match inst.state {
                InstanceState::Pending | InstanceState::Ready => {
                    inst.state = InstanceState::Cancelled;
                    inst.failure = Some("run cancelled".into());
                }
                InstanceState::Running => running.push(id),
                _ => {}
            }
        }
        for node in self.graph.deferred_mut() {
            if node.is_waiting() {
                node.state = DeferredState::Cancelled;
            }
        }

        info!(running = running.len(), "run cancelled; stopping running instances");
        running
    }

    /// With nothing left to run, waiting nodes can never resolve.
    fn abandon_waiting(&mut self) {
        for node in self.graph.deferred_mut() {
            if node.is_waiting() {
                warn!(task = %node.task, "task never became resolvable; cancelling");
                node.state = DeferredState::Cancelled;
            }
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_scheduler(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use crate::fs::mock::MockFileSystem;
    use crate::fs::FileSystem;
    use crate::ledger::{fingerprint, LedgerEntry, MemoryLedger, RunLedger};
    use crate::task::{PipelineBuilder, TaskSpec};

    fn ctx(fs: &MockFileSystem, ledger: Arc<MemoryLedger>) -> ResolveContext {
        ResolveContext {
            fs: Arc::new(fs.clone()),
            root: PathBuf::from("."),
            ledger,
            forced: BTreeSet::new(),
        }
    }

    fn transform_then_merge() -> PipelineSpec {
        PipelineBuilder::new()
            .task(
                TaskSpec::transform("A")
                    .input("raw/*.txt")
                    .output("out/{stem}.processed")
                    .command(["true"]),
            )
            .task(
                TaskSpec::merge("M")
                    .input("out/*.processed")
                    .output("all.txt")
                    .command(["true"]),
            )
            .build()
            .unwrap()
    }

    fn record(fs: &MockFileSystem, ledger: &MemoryLedger, task: &str, path: &str) {
        let (m, h) = fingerprint(fs, Path::new(path)).unwrap();
        ledger.record(LedgerEntry::new(task, path, m, h)).unwrap();
    }

    #[test]
    fn transform_yields_one_ready_instance_per_input() {
        let fs = MockFileSystem::new();
        fs.add_file("raw/x.txt", "x");
        fs.add_file("raw/y.txt", "y");
        let ledger = Arc::new(MemoryLedger::new());

        let scheduler = Scheduler::new(transform_then_merge(), vec![], ctx(&fs, ledger)).unwrap();
        let a = scheduler.instances_of("A");
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|i| i.state == InstanceState::Ready));
        assert_eq!(a[0].outputs, vec![PathBuf::from("out/x.processed")]);

        let m = scheduler.instances_of("M");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].state, InstanceState::Pending);
        assert_eq!(m[0].data_deps.len(), 2);
    }

    #[test]
    fn failure_cancels_only_descendants() {
        let fs = MockFileSystem::new();
        fs.add_file("raw/x.txt", "x");
        fs.add_file("raw/y.txt", "y");
        let ledger = Arc::new(MemoryLedger::new());
        let mut scheduler =
            Scheduler::new(transform_then_merge(), vec![], ctx(&fs, ledger)).unwrap();

        let ready = scheduler.collect_ready();
        assert_eq!(ready.len(), 2);

        let step = scheduler.step_completion(ready[0].id, InstanceOutcome::Failed("boom".into()));
        assert_eq!(step.newly_cancelled.len(), 1);
        assert!(!step.run_just_finished);

        let step = scheduler.step_completion(
            ready[1].id,
            InstanceOutcome::Succeeded(ready[1].outputs.clone()),
        );
        assert!(step.newly_scheduled.is_empty());
        assert!(step.run_just_finished);

        let summary = scheduler.summary();
        assert_eq!(summary.count(InstanceState::Failed), 1);
        assert_eq!(summary.count(InstanceState::Succeeded), 1);
        assert_eq!(summary.count(InstanceState::Cancelled), 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn deleted_output_reruns_its_instance_and_the_merge() {
        let fs = MockFileSystem::new();
        let ledger = Arc::new(MemoryLedger::new());
        fs.add_file("raw/x.txt", "x");
        fs.add_file("raw/y.txt", "y");
        fs.add_file("out/x.processed", "X");
        fs.add_file("out/y.processed", "Y");
        fs.add_file("all.txt", "XY");
        record(&fs, &ledger, "A", "out/x.processed");
        record(&fs, &ledger, "A", "out/y.processed");
        record(&fs, &ledger, "M", "all.txt");

        let scheduler =
            Scheduler::new(transform_then_merge(), vec![], ctx(&fs, ledger.clone())).unwrap();
        assert!(scheduler.instances().iter().all(|i| i.state == InstanceState::Fresh));

        fs.remove_file(Path::new("out/x.processed")).unwrap();
        let scheduler = Scheduler::new(transform_then_merge(), vec![], ctx(&fs, ledger)).unwrap();
        let a = scheduler.instances_of("A");
        assert_eq!(a[0].state, InstanceState::Ready);
        assert_eq!(a[1].state, InstanceState::Fresh);
        assert_eq!(scheduler.instances_of("M")[0].state, InstanceState::Pending);
    }

    #[test]
    fn split_consumers_wait_for_the_split() {
        let fs = MockFileSystem::new();
        fs.add_file("reads.fq", "r");
        let ledger = Arc::new(MemoryLedger::new());
        let pipeline = PipelineBuilder::new()
            .task(
                TaskSpec::split("assemble")
                    .input("reads.fq")
                    .output("contigs/*.fa")
                    .command(["true"]),
            )
            .task(
                TaskSpec::transform("annotate")
                    .input("contigs/*.fa")
                    .output("gff/{stem}.gff")
                    .command(["true"]),
            )
            .build()
            .unwrap();

        let mut scheduler = Scheduler::new(pipeline, vec![], ctx(&fs, ledger)).unwrap();
        assert!(scheduler.instances_of("annotate").is_empty());
        assert!(scheduler.deferred().any(|d| d.task == "annotate" && d.is_waiting()));

        let ready = scheduler.collect_ready();
        assert_eq!(ready.len(), 1);
        fs.add_file("contigs/a.fa", "a");
        fs.add_file("contigs/b.fa", "b");
        let step = scheduler.step_completion(
            ready[0].id,
            InstanceOutcome::Succeeded(vec![
                PathBuf::from("contigs/a.fa"),
                PathBuf::from("contigs/b.fa"),
            ]),
        );
        assert_eq!(step.newly_resolved, vec!["annotate".to_string()]);
        assert_eq!(step.newly_scheduled.len(), 2);
    }

    #[test]
    fn failed_split_cancels_deferred_consumers() {
        let fs = MockFileSystem::new();
        fs.add_file("reads.fq", "r");
        let ledger = Arc::new(MemoryLedger::new());
        let pipeline = PipelineBuilder::new()
            .task(TaskSpec::split("S").input("reads.fq").output("parts/*").command(["true"]))
            .task(TaskSpec::merge("M").from_task("S").output("joined").command(["true"]))
            .build()
            .unwrap();

        let mut scheduler = Scheduler::new(pipeline, vec![], ctx(&fs, ledger)).unwrap();
        let ready = scheduler.collect_ready();
        let step = scheduler.step_completion(ready[0].id, InstanceOutcome::Failed("x".into()));
        assert!(step.run_just_finished);
        assert!(scheduler
            .deferred()
            .any(|d| d.task == "M" && d.state == DeferredState::Cancelled));
    }

    #[test]
    fn cancel_all_reports_running_instances() {
        let fs = MockFileSystem::new();
        fs.add_file("raw/x.txt", "x");
        let ledger = Arc::new(MemoryLedger::new());
        let mut scheduler =
            Scheduler::new(transform_then_merge(), vec![], ctx(&fs, ledger)).unwrap();
        let ready = scheduler.collect_ready();
        let running = scheduler.cancel_all();
        assert_eq!(running, vec![ready[0].id]);
        assert!(!scheduler.is_finished());

        let step = scheduler.step_completion(ready[0].id, InstanceOutcome::Cancelled);
        assert!(step.run_just_finished);
        assert!(scheduler.cancelled_by_user());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let fs = MockFileSystem::new();
        let ledger = Arc::new(MemoryLedger::new());
        let err = Scheduler::new(transform_then_merge(), vec!["nope".into()], ctx(&fs, ledger))
            .unwrap_err();
        assert!(matches!(err, PipedagError::TaskNotFound(_)));
    }
}

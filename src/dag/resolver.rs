// src/dag/resolver.rs

//! Two-phase instance graph construction.
//!
//! Tasks are resolved in topological order. A task whose upstream includes a
//! split that has not succeeded yet (or a task that is itself still
//! deferred) becomes a [`DeferredNode`]; it is resolved again every time a
//! split completes. Everything else is materialised into [`TaskInstance`]s
//! immediately and classified by the staleness evaluator.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::instance::{InstanceId, InstanceState, TaskInstance};
use crate::errors::{PipedagError, Result};
use crate::fs::FileSystem;
use crate::ledger::RunLedger;
use crate::pattern::{bind, path_str, InputSelector};
use crate::staleness::{Classification, Evaluator, InstanceFacts, StaleReason};
use crate::task::{PipelineSpec, TaskName, TaskSpec};
use crate::types::TaskKind;

/// Filesystem, root, ledger and forced tasks used while resolving.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub fs: Arc<dyn FileSystem>,
    pub root: PathBuf,
    pub ledger: Arc<dyn RunLedger>,
    pub forced: BTreeSet<TaskName>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredState {
    /// Waiting for the listed upstream tasks.
    Waiting(Vec<TaskName>),
    /// An upstream split failed or was cancelled.
    Cancelled,
    /// Resolution itself failed once the split outputs were known.
    Failed(String),
}

/// A task whose instances are not known yet.
#[derive(Debug, Clone)]
pub struct DeferredNode {
    pub task: TaskName,
    pub state: DeferredState,
}

impl DeferredNode {
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, DeferredState::Waiting(_))
    }
}

/// Instances plus the bookkeeping needed to resolve deferred tasks.
#[derive(Debug, Default)]
pub struct InstanceGraph {
    instances: Vec<TaskInstance>,
    by_task: BTreeMap<TaskName, Vec<InstanceId>>,
    producers: HashMap<PathBuf, InstanceId>,
    deferred: BTreeMap<TaskName, DeferredNode>,
}

enum Readiness {
    Resolve,
    Wait(Vec<TaskName>),
    Doomed,
}

impl InstanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> &[TaskInstance] {
        &self.instances
    }

    pub fn get(&self, id: InstanceId) -> Option<&TaskInstance> {
        self.instances.get(id.0)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut TaskInstance> {
        self.instances.get_mut(id.0)
    }

    pub fn instances_of(&self, task: &str) -> impl Iterator<Item = &TaskInstance> {
        self.by_task
            .get(task)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id.0))
    }

    pub fn is_resolved(&self, task: &str) -> bool {
        self.by_task.contains_key(task)
    }

    pub fn deferred(&self) -> impl Iterator<Item = &DeferredNode> {
        self.deferred.values()
    }

    pub fn deferred_mut(&mut self) -> impl Iterator<Item = &mut DeferredNode> {
        self.deferred.values_mut()
    }

    /// Instance that produces `path`, if any.
    pub fn producer_of(&self, path: &std::path::Path) -> Option<InstanceId> {
        self.producers.get(path).copied()
    }

    /// Replace the outputs of a succeeded split with what it actually
    /// produced.
    pub fn set_split_outputs(&mut self, id: InstanceId, outputs: Vec<PathBuf>) {
        let Some(inst) = self.instances.get(id.0) else {
            return;
        };
        let task = inst.task.clone();
        let old = inst.outputs.clone();
        for path in old {
            if self.producers.get(&path) == Some(&id) {
                self.producers.remove(&path);
            }
        }
        let mut kept = Vec::with_capacity(outputs.len());
        for path in outputs {
            match self.producers.get(&path) {
                Some(other) if *other != id => {
                    warn!(
                        task = %task,
                        output = %path_str(&path),
                        "split produced a file another instance already owns; ignoring it"
                    );
                }
                _ => {
                    self.producers.insert(path.clone(), id);
                    kept.push(path);
                }
            }
        }
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.outputs = kept;
        }
    }

    /// Resolve every task in `closure` that can be resolved now.
    ///
    /// With `strict`, the first resolution error is returned (initial
    /// build); otherwise the offending task becomes a failed deferred node
    /// and resolution continues.
    pub fn resolve_pending(
        &mut self,
        pipeline: &PipelineSpec,
        closure: &BTreeSet<TaskName>,
        ctx: &ResolveContext,
        strict: bool,
    ) -> Result<Vec<TaskName>> {
        let mut resolved = Vec::new();

        for name in pipeline.graph.order() {
            if !closure.contains(name) || self.by_task.contains_key(name) {
                continue;
            }
            if let Some(node) = self.deferred.get(name) {
                if !node.is_waiting() {
                    continue;
                }
            }
            let Some(spec) = pipeline.task(name) else {
                continue;
            };

            match self.readiness(pipeline, name) {
                Readiness::Wait(upstream) => {
                    debug!(task = %name, ?upstream, "deferring task until upstream resolves");
                    self.deferred.insert(
                        name.clone(),
                        DeferredNode {
                            task: name.clone(),
                            state: DeferredState::Waiting(upstream),
                        },
                    );
                }
                Readiness::Doomed => {
                    info!(task = %name, "upstream split did not succeed; cancelling deferred task");
                    self.deferred.insert(
                        name.clone(),
                        DeferredNode {
                            task: name.clone(),
                            state: DeferredState::Cancelled,
                        },
                    );
                }
                Readiness::Resolve => match self.materialise(pipeline, spec, ctx) {
                    Ok(count) => {
                        debug!(task = %name, instances = count, "resolved task");
                        self.deferred.remove(name);
                        resolved.push(name.clone());
                    }
                    Err(e) if strict => return Err(e),
                    Err(e) => {
                        warn!(task = %name, error = %e, "resolving task failed");
                        self.deferred.insert(
                            name.clone(),
                            DeferredNode {
                                task: name.clone(),
                                state: DeferredState::Failed(e.to_string()),
                            },
                        );
                    }
                },
            }
        }

        Ok(resolved)
    }

    fn readiness(&self, pipeline: &PipelineSpec, name: &str) -> Readiness {
        let mut waiting = Vec::new();

        for dep in pipeline.graph.dependencies_of(name) {
            if let Some(node) = self.deferred.get(dep) {
                if !node.is_waiting() {
                    return Readiness::Doomed;
                }
            }
            let Some(ids) = self.by_task.get(dep) else {
                waiting.push(dep.clone());
                continue;
            };
            let is_split = pipeline
                .task(dep)
                .is_some_and(|s| s.kind == TaskKind::Split);
            if !is_split {
                continue;
            }
            for id in ids {
                let state = self.instances[id.0].state;
                if state.is_broken() {
                    return Readiness::Doomed;
                }
                if !state.is_satisfied() {
                    waiting.push(dep.clone());
                }
            }
        }

        if waiting.is_empty() {
            Readiness::Resolve
        } else {
            Readiness::Wait(waiting)
        }
    }

    /// An aggregate has nothing to compare: it is fresh exactly when every
    /// prerequisite is.
    fn classify_aggregate(&self, inst: &TaskInstance, forced: bool) -> Classification {
        if forced {
            return Classification::Ready(StaleReason::Forced);
        }
        let all_fresh = inst
            .deps()
            .all(|d| self.instances[d.0].state == InstanceState::Fresh);
        if all_fresh {
            Classification::Fresh
        } else {
            Classification::Ready(StaleReason::UpstreamRebuilt)
        }
    }

    fn outputs_of_task(&self, task: &str) -> Vec<PathBuf> {
        self.instances_of(task)
            .flat_map(|i| i.outputs.iter().cloned())
            .collect()
    }

    fn gather_primaries(&self, spec: &TaskSpec, ctx: &ResolveContext) -> Result<Vec<PathBuf>> {
        let mut primaries = Vec::new();

        for upstream in &spec.from {
            primaries.extend(self.outputs_of_task(upstream));
        }

        for selector in &spec.inputs {
            match selector {
                InputSelector::Literal(path) => primaries.push(path.clone()),
                InputSelector::Glob { .. } => {
                    let mut found = selector.resolve(ctx.fs.as_ref(), &ctx.root)?;
                    found.extend(
                        self.producers
                            .iter()
                            .filter(|(path, id)| {
                                self.instances[id.0].task != spec.name && selector.matches(path)
                            })
                            .map(|(path, _)| path.clone()),
                    );
                    found.sort();
                    found.dedup();
                    primaries.extend(found);
                }
            }
        }

        let mut seen = HashSet::new();
        primaries.retain(|p| seen.insert(p.clone()));
        Ok(primaries)
    }

    fn materialise(
        &mut self,
        pipeline: &PipelineSpec,
        spec: &TaskSpec,
        ctx: &ResolveContext,
    ) -> Result<usize> {
        let primaries = self.gather_primaries(spec, ctx)?;
        let extras: Vec<PathBuf> = spec
            .add_inputs
            .iter()
            .flat_map(|t| self.outputs_of_task(t))
            .collect();

        let bindings = bind(
            &spec.name,
            spec.kind,
            spec.regex.as_ref(),
            &spec.output,
            &primaries,
            &extras,
            ctx.fs.as_ref(),
            &ctx.root,
        )?;

        for binding in &bindings {
            for out in &binding.outputs {
                if let Some(other) = self.producers.get(out) {
                    return Err(PipedagError::PatternResolution(format!(
                        "output {} of task '{}' is also produced by task '{}'",
                        path_str(out),
                        spec.name,
                        self.instances[other.0].task
                    )));
                }
            }
        }

        let order_deps: BTreeSet<InstanceId> = pipeline
            .graph
            .order_deps_of(&spec.name)
            .flat_map(|t| self.by_task.get(t).cloned().unwrap_or_default())
            .collect();
        let evaluator = Evaluator::new(ctx.fs.as_ref(), &ctx.root, ctx.ledger.as_ref());
        let forced = ctx.forced.contains(&spec.name);

        // Classify everything before touching the graph, so a failure leaves
        // no half-registered task behind.
        let base = self.instances.len();
        let mut created = Vec::with_capacity(bindings.len());
        for (offset, binding) in bindings.into_iter().enumerate() {
            let id = InstanceId(base + offset);

            let data_deps: BTreeSet<InstanceId> = binding
                .inputs
                .iter()
                .filter_map(|p| self.producers.get(p).copied())
                .collect();
            let produced: BTreeSet<PathBuf> = binding
                .inputs
                .iter()
                .filter(|p| self.producers.contains_key(*p))
                .cloned()
                .collect();

            let broken_dep = data_deps
                .iter()
                .chain(order_deps.iter())
                .find(|d| self.instances[d.0].state.is_broken())
                .copied();

            let mut inst = TaskInstance {
                id,
                task: spec.name.clone(),
                kind: spec.kind,
                inputs: binding.inputs,
                outputs: binding.outputs,
                captures: binding.captures,
                data_deps,
                order_deps: order_deps.clone(),
                dependents: BTreeSet::new(),
                state: InstanceState::Pending,
                reason: None,
                missing: Vec::new(),
                failure: None,
                started_at: None,
                finished_at: None,
            };

            if let Some(dep) = broken_dep {
                inst.state = InstanceState::Cancelled;
                inst.failure = Some(format!(
                    "upstream {} ({}) did not complete",
                    self.instances[dep.0].task, dep
                ));
            } else {
                let classification = if spec.is_aggregate() {
                    self.classify_aggregate(&inst, forced)
                } else {
                    let upstream_fresh = inst
                        .data_deps
                        .iter()
                        .all(|d| self.instances[d.0].state == InstanceState::Fresh);
                    evaluator.classify(&InstanceFacts {
                        task: &spec.name,
                        kind: spec.kind,
                        inputs: &inst.inputs,
                        outputs: &inst.outputs,
                        produced: &produced,
                        upstream_fresh,
                        forced,
                    })?
                };
                match classification {
                    Classification::Fresh => inst.state = InstanceState::Fresh,
                    Classification::Ready(reason) => {
                        inst.state = InstanceState::Pending;
                        inst.reason = Some(reason);
                    }
                    Classification::MissingInputs(missing) => {
                        warn!(
                            task = %spec.name,
                            missing = ?missing,
                            "instance has inputs nothing will produce"
                        );
                        inst.state = InstanceState::MissingInputs;
                        inst.missing = missing;
                    }
                }
            }
            created.push(inst);
        }

        let mut ids = Vec::with_capacity(created.len());
        for inst in created {
            let id = inst.id;
            debug!(
                task = %spec.name,
                instance = %id,
                state = %inst.state,
                outputs = %inst.key(),
                "created task instance"
            );
            for dep in inst.deps().collect::<Vec<_>>() {
                self.instances[dep.0].dependents.insert(id);
            }
            for out in &inst.outputs {
                self.producers.insert(out.clone(), id);
            }
            self.instances.push(inst);
            ids.push(id);
        }

        let count = ids.len();
        self.by_task.insert(spec.name.clone(), ids);
        Ok(count)
    }
}

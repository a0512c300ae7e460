// src/exec/task_runner.rs

//! Runs one task instance end to end: prepares outputs, executes the body
//! locally or on the cluster, publishes outputs and records them.
//!
//! Transform and merge bodies write to staging files next to their final
//! outputs; staging files are renamed into place only after the body
//! succeeded. Split bodies write straight into their output directory, so a
//! split's outputs only count once the ledger records them.
//!
//! Preparing and publishing hash files and append to the ledger, so both run
//! on tokio's blocking pool rather than on a runtime worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use tracing::{error, info, warn};

use crate::dag::ScheduledInstance;
use crate::engine::InstanceOutcome;
use crate::ledger::{fingerprint, LedgerEntry};
use crate::pattern::selector::STAGING_SUFFIX;
use crate::pattern::{path_str, OutputSpec};
use crate::task::{BodyContext, TaskBody};
use crate::types::ExecMode;

use super::cancel::CancelSignal;
use super::cluster::JobSpec;
use super::context::ExecContext;
use super::local::{self, BodyResult};

/// Where the body writes for one instance.
#[derive(Debug, Clone)]
struct Staging {
    /// (final output relative to the root, absolute staging path)
    files: Vec<(PathBuf, PathBuf)>,
    /// Split only: absolute directory the body writes into.
    output_dir: Option<PathBuf>,
}

/// Run `inst` to a terminal outcome. Never returns an error: anything that
/// goes wrong is reported as a failed instance.
pub async fn run_instance(
    inst: &ScheduledInstance,
    ctx: &ExecContext,
    cancel: &mut CancelSignal,
) -> InstanceOutcome {
    let started = Instant::now();
    info!(task = %inst.task, instance = %inst.id, inputs = inst.inputs.len(), "running instance");

    let staging = match blocking(inst, ctx, prepare).await {
        Ok(staging) => staging,
        Err(err) => {
            error!(task = %inst.task, instance = %inst.id, error = %err, "failed to prepare outputs");
            return InstanceOutcome::Failed(format!("preparing outputs: {err:#}"));
        }
    };

    let body_ctx = body_context(inst, ctx, &staging);
    let outcome = match execute_body(inst, ctx, &body_ctx, &staging, cancel).await {
        BodyResult::Succeeded => {
            let staged = staging.clone();
            match blocking(inst, ctx, move |inst, ctx| publish(inst, ctx, &staged)).await {
                Ok(outputs) => InstanceOutcome::Succeeded(outputs),
                Err(err) => {
                    discard(inst, ctx, &staging);
                    InstanceOutcome::Failed(format!("{err:#}"))
                }
            }
        }
        BodyResult::Failed(reason) => {
            discard(inst, ctx, &staging);
            InstanceOutcome::Failed(reason)
        }
        BodyResult::Cancelled => {
            discard(inst, ctx, &staging);
            InstanceOutcome::Cancelled
        }
    };

    match &outcome {
        InstanceOutcome::Failed(reason) => {
            warn!(task = %inst.task, instance = %inst.id, reason = %reason, "instance failed")
        }
        _ => info!(
            task = %inst.task,
            instance = %inst.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ?outcome,
            "instance finished"
        ),
    }
    outcome
}

/// Run `work` on the blocking pool with owned copies of the instance and
/// context.
async fn blocking<T, F>(inst: &ScheduledInstance, ctx: &ExecContext, work: F) -> Result<T>
where
    F: FnOnce(&ScheduledInstance, &ExecContext) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let inst = inst.clone();
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || work(&inst, &ctx))
        .await
        .map_err(|e| anyhow!("blocking file work did not finish: {e}"))?
}

/// `<dir>/.<name>.pipedag-tmp`
pub fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = format!(".{name}{STAGING_SUFFIX}");
    match target.parent() {
        Some(parent) => parent.join(file),
        None => PathBuf::from(file),
    }
}

/// Create output directories, forget previous results and clear leftovers.
fn prepare(inst: &ScheduledInstance, ctx: &ExecContext) -> Result<Staging> {
    let fs = ctx.fs.as_ref();

    if let OutputSpec::Discovered(selector) = &inst.spec.output {
        let dir = ctx.root.join(selector.base_dir());
        fs.create_dir_all(&dir)?;
        for entry in ctx.ledger.entries_for_task(&inst.task) {
            ctx.ledger.invalidate(&inst.task, &entry.output)?;
        }
        for stale in selector.resolve(fs, &ctx.root)? {
            fs.remove_file(&ctx.root.join(&stale))?;
        }
        return Ok(Staging {
            files: Vec::new(),
            output_dir: Some(dir),
        });
    }

    let mut files = Vec::with_capacity(inst.outputs.len());
    for output in &inst.outputs {
        let target = ctx.root.join(output);
        if let Some(parent) = target.parent() {
            fs.create_dir_all(parent)?;
        }
        ctx.ledger.invalidate(&inst.task, output)?;
        let staged = staging_path(&target);
        if fs.exists(&staged) {
            fs.remove_file(&staged)?;
        }
        files.push((output.clone(), staged));
    }
    Ok(Staging {
        files,
        output_dir: None,
    })
}

fn body_context(inst: &ScheduledInstance, ctx: &ExecContext, staging: &Staging) -> BodyContext {
    BodyContext {
        task: inst.task.clone(),
        inputs: inst.inputs.iter().map(|p| ctx.root.join(p)).collect(),
        outputs: staging.files.iter().map(|(_, s)| s.clone()).collect(),
        output_dir: staging.output_dir.clone(),
        captures: inst.captures.clone(),
        params: Arc::clone(&ctx.params),
        workdir: ctx.root.clone(),
    }
}

async fn execute_body(
    inst: &ScheduledInstance,
    ctx: &ExecContext,
    body_ctx: &BodyContext,
    staging: &Staging,
    cancel: &mut CancelSignal,
) -> BodyResult {
    let wants_cluster = inst.spec.mode == ExecMode::Cluster && !ctx.force_local;

    match &inst.spec.body {
        TaskBody::Command(cmd) => {
            let argv = match cmd.render(body_ctx) {
                Ok(argv) => argv,
                Err(e) => return BodyResult::Failed(e.to_string()),
            };
            if wants_cluster {
                match &ctx.cluster {
                    Some(cluster) => {
                        let job = JobSpec {
                            name: format!("{}-{}", inst.task, inst.id.0),
                            argv,
                            workdir: ctx.root.clone(),
                            resources: inst.spec.resources.clone(),
                        };
                        return cluster.run(&job, cancel, &|| discard(inst, ctx, staging)).await;
                    }
                    None => warn!(task = %inst.task, "no cluster backend configured; running locally"),
                }
            }
            local::run_command(&inst.task, inst.id, &argv, &ctx.root, cancel).await
        }
        TaskBody::Native(body) => {
            if wants_cluster {
                warn!(task = %inst.task, "in-process bodies cannot be submitted; running locally");
            }
            local::run_native(Arc::clone(body), body_ctx.clone(), cancel).await
        }
        TaskBody::Noop => BodyResult::Succeeded,
    }
}

/// Move staged outputs into place and record them in the ledger.
fn publish(inst: &ScheduledInstance, ctx: &ExecContext, staging: &Staging) -> Result<Vec<PathBuf>> {
    let fs = ctx.fs.as_ref();

    let outputs = match &inst.spec.output {
        OutputSpec::Discovered(selector) => {
            let found = selector.resolve(fs, &ctx.root)?;
            if found.is_empty() {
                warn!(task = %inst.task, pattern = %selector.pattern(), "split produced no outputs");
            }
            found
        }
        OutputSpec::Derived(_) | OutputSpec::Fixed(_) | OutputSpec::Nothing => {
            for (output, staged) in &staging.files {
                if !fs.exists(staged) {
                    bail!("task did not create output {}", path_str(output));
                }
            }
            for (output, staged) in &staging.files {
                fs.rename(staged, &ctx.root.join(output))?;
            }
            staging.files.iter().map(|(output, _)| output.clone()).collect()
        }
    };

    for output in &outputs {
        let (modified_ns, hash) = fingerprint(fs, &ctx.root.join(output))?;
        ctx.ledger
            .record(LedgerEntry::new(inst.task.clone(), output.clone(), modified_ns, hash))?;
    }
    Ok(outputs)
}

/// Remove partial outputs of an unsuccessful attempt.
fn discard(inst: &ScheduledInstance, ctx: &ExecContext, staging: &Staging) {
    let fs = ctx.fs.as_ref();
    let mut leftovers: Vec<PathBuf> = staging.files.iter().map(|(_, s)| s.clone()).collect();
    if let OutputSpec::Discovered(selector) = &inst.spec.output {
        match selector.resolve(fs, &ctx.root) {
            Ok(found) => leftovers.extend(found.into_iter().map(|p| ctx.root.join(p))),
            Err(e) => warn!(task = %inst.task, error = %e, "could not list partial split outputs"),
        }
    }
    for path in leftovers {
        if fs.exists(&path) {
            if let Err(e) = fs.remove_file(&path) {
                warn!(task = %inst.task, path = ?path, error = %e, "failed to remove partial output");
            }
        }
    }
}

// src/exec/touch.rs

//! `--touch` mode: mark existing outputs up to date without running bodies.
//!
//! Instances are dispatched in dependency order, so refreshing modification
//! times in dispatch order leaves every output newer than its inputs. Each
//! touched output gets a fresh ledger entry.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{anyhow, bail, Result as AnyResult};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dag::{InstanceId, ScheduledInstance};
use crate::engine::{InstanceOutcome, RuntimeEvent};
use crate::errors::Result;
use crate::ledger::{fingerprint, LedgerEntry};
use crate::pattern::{path_str, OutputSpec};

use super::backend::ExecutorBackend;
use super::context::ExecContext;

#[derive(Debug)]
pub struct TouchExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    ctx: Arc<ExecContext>,
}

impl TouchExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, ctx: Arc<ExecContext>) -> Self {
        Self { runtime_tx, ctx }
    }
}

/// Refresh and record the outputs of `inst`. Blocks on hashing.
fn touch(inst: &ScheduledInstance, ctx: &ExecContext) -> AnyResult<Vec<PathBuf>> {
    let fs = ctx.fs.as_ref();
    let outputs = match &inst.spec.output {
        OutputSpec::Discovered(selector) => selector.resolve(fs, &ctx.root)?,
        OutputSpec::Derived(_) | OutputSpec::Fixed(_) => inst.outputs.clone(),
        OutputSpec::Nothing => return Ok(Vec::new()),
    };
    if outputs.is_empty() {
        bail!("no existing outputs to touch");
    }
    for output in &outputs {
        if !fs.exists(&ctx.root.join(output)) {
            bail!("output {} does not exist", path_str(output));
        }
    }

    let now = SystemTime::now();
    for output in &outputs {
        let abs = ctx.root.join(output);
        fs.set_modified(&abs, now)?;
        let (modified_ns, hash) = fingerprint(fs, &abs)?;
        ctx.ledger
            .record(LedgerEntry::new(inst.task.clone(), output.clone(), modified_ns, hash))?;
    }
    Ok(outputs)
}

impl ExecutorBackend for TouchExecutor {
    fn spawn_ready(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for inst in instances {
                let ctx = Arc::clone(&self.ctx);
                let job = inst.clone();
                let touched = tokio::task::spawn_blocking(move || touch(&job, &ctx))
                    .await
                    .map_err(|e| anyhow!("touch did not finish: {e}"))
                    .and_then(|r| r);
                let outcome = match touched {
                    Ok(outputs) => {
                        info!(task = %inst.task, instance = %inst.id, outputs = outputs.len(), "touched outputs");
                        InstanceOutcome::Succeeded(outputs)
                    }
                    Err(err) => {
                        warn!(task = %inst.task, instance = %inst.id, error = %err, "cannot touch instance");
                        InstanceOutcome::Failed(format!("touch: {err:#}"))
                    }
                };
                // The channel may be full of our own events; never block the
                // runtime that is calling us.
                let tx = self.runtime_tx.clone();
                let id = inst.id;
                tokio::spawn(async move {
                    let _ = tx.send(RuntimeEvent::InstanceStarted { id }).await;
                    let _ = tx.send(RuntimeEvent::InstanceCompleted { id, outcome }).await;
                });
            }
            Ok(())
        })
    }

    fn cancel(&mut self, _ids: Vec<InstanceId>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Touching is synchronous; there is never anything in flight to stop.
        Box::pin(async { Ok(()) })
    }
}

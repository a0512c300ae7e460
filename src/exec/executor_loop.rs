// src/exec/executor_loop.rs

//! Main executor loop that manages running task instances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::dag::{InstanceId, ScheduledInstance};
use crate::engine::{InstanceOutcome, RuntimeEvent};
use crate::pattern::OutputSpec;

use super::cancel::CancelSignal;
use super::context::ExecContext;
use super::task_runner::run_instance;

/// Requests the runtime sends to the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Run(ScheduledInstance),
    Cancel(Vec<InstanceId>),
}

/// Internal handle for an instance that has been handed to the executor.
///
/// - `cancel` asks the instance to stop, whether it is still waiting for a
///   slot or already running.
/// - `handle` is the Tokio task driving it.
struct ActiveInstance {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Every instance runs in its own Tokio task. At most `ctx.concurrency`
/// instances run at once, and an instance holds the write locks of all its
/// outputs for as long as it runs.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    ctx: Arc<ExecContext>,
) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(64);

    tokio::spawn(async move {
        info!(concurrency = ctx.concurrency, "executor loop started");

        let slots = Arc::new(Semaphore::new(ctx.concurrency.max(1)));
        let mut active: HashMap<InstanceId, ActiveInstance> = HashMap::new();

        while let Some(message) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());
            match message {
                ExecutorMessage::Run(inst) => {
                    spawn_instance(inst, &mut active, &slots, &ctx, &runtime_tx);
                }
                ExecutorMessage::Cancel(ids) => {
                    for id in ids {
                        cancel_instance(id, &mut active);
                    }
                }
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn spawn_instance(
    inst: ScheduledInstance,
    active: &mut HashMap<InstanceId, ActiveInstance>,
    slots: &Arc<Semaphore>,
    ctx: &Arc<ExecContext>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let id = inst.id;
    if active.contains_key(&id) {
        warn!(instance = %id, task = %inst.task, "instance already dispatched; ignoring");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let slots = Arc::clone(slots);
    let ctx = Arc::clone(ctx);
    let runtime_tx = runtime_tx.clone();

    let handle = tokio::spawn(async move {
        let task = inst.task.clone();
        let outcome = drive_instance(inst, &ctx, slots, &runtime_tx, CancelSignal::new(cancel_rx)).await;
        if runtime_tx
            .send(RuntimeEvent::InstanceCompleted { id, outcome })
            .await
            .is_err()
        {
            debug!(instance = %id, task = %task, "runtime gone before completion was delivered");
        }
    });

    active.insert(
        id,
        ActiveInstance {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

/// Wait for a slot and the output locks, then run the instance.
async fn drive_instance(
    inst: ScheduledInstance,
    ctx: &ExecContext,
    slots: Arc<Semaphore>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    mut cancel: CancelSignal,
) -> InstanceOutcome {
    let permit = tokio::select! {
        permit = slots.acquire_owned() => permit.ok(),
        _ = cancel.cancelled() => None,
    };
    let Some(_permit) = permit else {
        return InstanceOutcome::Cancelled;
    };

    let keys = lock_keys(&inst);
    let guard = tokio::select! {
        guard = ctx.locks.acquire(&keys) => Some(guard),
        _ = cancel.cancelled() => None,
    };
    let Some(_guard) = guard else {
        return InstanceOutcome::Cancelled;
    };

    if runtime_tx
        .send(RuntimeEvent::InstanceStarted { id: inst.id })
        .await
        .is_err()
    {
        return InstanceOutcome::Cancelled;
    }

    run_instance(&inst, ctx, &mut cancel).await
}

/// Paths an instance writes. A split locks its whole output pattern.
fn lock_keys(inst: &ScheduledInstance) -> Vec<PathBuf> {
    match &inst.spec.output {
        OutputSpec::Discovered(selector) => vec![PathBuf::from(selector.pattern())],
        _ => inst.outputs.clone(),
    }
}

fn cancel_instance(id: InstanceId, active: &mut HashMap<InstanceId, ActiveInstance>) {
    let Some(existing) = active.get_mut(&id) else {
        debug!(instance = %id, "cancel requested for an instance that is not active");
        return;
    };
    match existing.cancel.take() {
        Some(cancel) => {
            info!(instance = %id, "cancelling instance");
            if cancel.send(()).is_err() {
                debug!(instance = %id, "instance finished while cancelling");
            }
        }
        None => debug!(instance = %id, "instance already cancelled"),
    }
}

// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`executor_loop`](super::executor_loop).
//!
//! - `RealExecutorBackend` runs bodies locally or on the cluster and
//!   reports back through `RuntimeEvent`s.
//! - [`TouchExecutor`](super::touch::TouchExecutor) refreshes existing
//!   outputs instead of running anything.
//! - Tests can provide their own `ExecutorBackend` that records which
//!   instances were dispatched and emits completions directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::dag::{InstanceId, ScheduledInstance};
use crate::engine::RuntimeEvent;
use crate::errors::Result;

use super::context::ExecContext;
use super::executor_loop::{spawn_executor, ExecutorMessage};

/// Trait abstracting how scheduled instances are executed.
///
/// Every dispatched instance must eventually produce exactly one
/// `InstanceCompleted` event, including instances that are cancelled.
pub trait ExecutorBackend: Send {
    /// Dispatch the given instances for execution.
    fn spawn_ready(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask the given dispatched instances to stop.
    fn cancel(&mut self, ids: Vec<InstanceId>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
#[derive(Debug)]
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorMessage>,
}

impl RealExecutorBackend {
    /// Spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, ctx: Arc<ExecContext>) -> Self {
        let tx = spawn_executor(runtime_tx, ctx);
        Self { tx }
    }

    async fn send(tx: mpsc::Sender<ExecutorMessage>, message: ExecutorMessage) -> Result<()> {
        tx.send(message)
            .await
            .map_err(|_| anyhow!("executor loop has shut down"))?;
        Ok(())
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for inst in instances {
                Self::send(tx.clone(), ExecutorMessage::Run(inst)).await?;
            }
            Ok(())
        })
    }

    fn cancel(&mut self, ids: Vec<InstanceId>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move { Self::send(tx, ExecutorMessage::Cancel(ids)).await })
    }
}

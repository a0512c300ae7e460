use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use pipedag::dag::{InstanceId, ScheduledInstance};
use pipedag::engine::{InstanceOutcome, RuntimeEvent};
use pipedag::errors::Result;
use pipedag::exec::ExecutorBackend;

/// What the fake did with one dispatched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRun {
    pub id: InstanceId,
    pub task: String,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

/// Shared, inspectable state of a [`FakeExecutor`].
#[derive(Debug, Default)]
pub struct FakeLog {
    pub runs: Vec<FakeRun>,
    pub cancelled: Vec<InstanceId>,
    /// Highest number of instances seen running at the same time.
    pub max_concurrent: usize,
    /// Highest number of instances seen writing the same output at once.
    pub max_writers_per_output: usize,
    running: usize,
    writers: HashMap<PathBuf, usize>,
}

impl FakeLog {
    pub fn tasks(&self) -> Vec<String> {
        self.runs.iter().map(|r| r.task.clone()).collect()
    }

    pub fn runs_of(&self, task: &str) -> usize {
        self.runs.iter().filter(|r| r.task == task).count()
    }
}

/// A fake executor that:
/// - records which instances were "run"
/// - reports `Failed` for instances of tasks in the fail set
/// - reports configured outputs for splits
/// - optionally keeps each instance "running" for `delay`, so concurrency
///   and cancellation can be observed.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    log: Arc<Mutex<FakeLog>>,
    fail: HashSet<String>,
    split_outputs: BTreeMap<String, Vec<PathBuf>>,
    delay: Option<Duration>,
    cancels: Arc<Mutex<HashMap<InstanceId, oneshot::Sender<()>>>>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, log: Arc<Mutex<FakeLog>>) -> Self {
        Self {
            runtime_tx,
            log,
            fail: HashSet::new(),
            split_outputs: BTreeMap::new(),
            delay: None,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn failing(mut self, task: &str) -> Self {
        self.fail.insert(task.to_string());
        self
    }

    pub fn split_outputs(mut self, task: &str, outputs: &[&str]) -> Self {
        self.split_outputs
            .insert(task.to_string(), outputs.iter().map(PathBuf::from).collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn outcome_for(&self, inst: &ScheduledInstance) -> InstanceOutcome {
        if self.fail.contains(&inst.task) {
            return InstanceOutcome::Failed(format!("{} failed on purpose", inst.task));
        }
        let outputs = self
            .split_outputs
            .get(&inst.task)
            .cloned()
            .unwrap_or_else(|| inst.outputs.clone());
        InstanceOutcome::Succeeded(outputs)
    }
}

fn enter(log: &Mutex<FakeLog>, outputs: &[PathBuf]) {
    let mut log = log.lock().unwrap();
    log.running += 1;
    log.max_concurrent = log.max_concurrent.max(log.running);
    for out in outputs {
        let n = {
            let w = log.writers.entry(out.clone()).or_insert(0);
            *w += 1;
            *w
        };
        log.max_writers_per_output = log.max_writers_per_output.max(n);
    }
}

fn leave(log: &Mutex<FakeLog>, outputs: &[PathBuf]) {
    let mut log = log.lock().unwrap();
    log.running -= 1;
    for out in outputs {
        if let Some(w) = log.writers.get_mut(out) {
            *w -= 1;
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for inst in instances {
                self.log.lock().unwrap().runs.push(FakeRun {
                    id: inst.id,
                    task: inst.task.clone(),
                    inputs: inst.inputs.clone(),
                    outputs: inst.outputs.clone(),
                });

                let outcome = self.outcome_for(&inst);
                let tx = self.runtime_tx.clone();
                let log = Arc::clone(&self.log);
                let delay = self.delay;
                let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
                self.cancels.lock().unwrap().insert(inst.id, cancel_tx);
                let cancels = Arc::clone(&self.cancels);

                // Completions go through a spawned task so the runtime that is
                // calling us is never blocked on its own channel.
                tokio::spawn(async move {
                    let id = inst.id;
                    let _ = tx.send(RuntimeEvent::InstanceStarted { id }).await;
                    enter(&log, &inst.outputs);
                    let outcome = match delay {
                        Some(d) => tokio::select! {
                            _ = tokio::time::sleep(d) => outcome,
                            Ok(()) = cancel_rx => InstanceOutcome::Cancelled,
                        },
                        None => outcome,
                    };
                    leave(&log, &inst.outputs);
                    cancels.lock().unwrap().remove(&id);
                    let _ = tx.send(RuntimeEvent::InstanceCompleted { id, outcome }).await;
                });
            }
            Ok(())
        })
    }

    fn cancel(&mut self, ids: Vec<InstanceId>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for id in ids {
                self.log.lock().unwrap().cancelled.push(id);
                if let Some(tx) = self.cancels.lock().unwrap().remove(&id) {
                    let _ = tx.send(());
                }
            }
            Ok(())
        })
    }
}

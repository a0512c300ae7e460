// src/exec/local.rs

//! Local execution of task bodies.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::InstanceId;
use crate::task::{BodyContext, NativeTask};

use super::cancel::CancelSignal;

/// What happened to a body, before outputs are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyResult {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Run an argv directly (no shell) in `workdir`.
pub async fn run_command(
    task: &str,
    id: InstanceId,
    argv: &[String],
    workdir: &Path,
    cancel: &mut CancelSignal,
) -> BodyResult {
    match run_command_inner(task, id, argv, workdir, cancel).await {
        Ok(result) => result,
        Err(err) => BodyResult::Failed(format!("{err:#}")),
    }
}

async fn run_command_inner(
    task: &str,
    id: InstanceId,
    argv: &[String],
    workdir: &Path,
    cancel: &mut CancelSignal,
) -> Result<BodyResult> {
    let (program, args) = argv.split_first().context("empty command line")?;

    info!(task = %task, instance = %id, cmd = %argv.join(" "), "starting process");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning '{program}' for task '{task}'"))?;

    if let Some(stdout) = child.stdout.take() {
        forward_lines(task.to_string(), id, "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(task.to_string(), id, "stderr", stderr);
    }

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for process of task '{task}'"))?;
            info!(
                task = %task,
                instance = %id,
                exit_code = status.code().unwrap_or(-1),
                success = status.success(),
                "process exited"
            );
            if status.success() {
                Ok(BodyResult::Succeeded)
            } else {
                let reason = match status.code() {
                    Some(code) => format!("command exited with code {code}"),
                    None => "command was terminated by a signal".to_string(),
                };
                Ok(BodyResult::Failed(reason))
            }
        }
        _ = cancel.cancelled() => {
            info!(task = %task, instance = %id, "cancellation requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(task = %task, instance = %id, error = %e, "failed to kill child process");
            }
            Ok(BodyResult::Cancelled)
        }
    }
}

/// Consume a child stream so its pipe never fills, logging each line.
fn forward_lines<R>(task: String, id: InstanceId, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %task, instance = %id, "{stream}: {line}");
        }
    });
}

/// Run an in-process body on the blocking pool.
///
/// Native bodies cannot be interrupted: on cancellation the body is allowed
/// to finish and the instance is then reported as cancelled.
pub async fn run_native(
    body: Arc<dyn NativeTask>,
    ctx: BodyContext,
    cancel: &mut CancelSignal,
) -> BodyResult {
    let task = ctx.task.clone();
    let mut handle = tokio::task::spawn_blocking(move || body.run(&ctx));

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(())) => BodyResult::Succeeded,
            Ok(Err(e)) => BodyResult::Failed(format!("{e:#}")),
            Err(e) => BodyResult::Failed(format!("task body panicked: {e}")),
        },
        _ = cancel.cancelled() => {
            warn!(task = %task, "native body cannot be interrupted; waiting for it to return");
            let _ = handle.await;
            BodyResult::Cancelled
        }
    }
}

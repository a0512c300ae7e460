// src/config/pipeline.rs

//! Turning a checked [`ConfigFile`] into engine values.

use std::time::Duration;

use crate::config::model::{ConfigFile, ConfigSection, TaskConfig};
use crate::errors::Result;
use crate::exec::RetryPolicy;
use crate::task::{PipelineBuilder, PipelineSpec, TaskDecl};

/// Compile every `[task.<name>]` into a [`PipelineSpec`].
///
/// Pattern, regex and template errors as well as cycles surface here.
pub fn pipeline_from_config(cfg: &ConfigFile) -> Result<PipelineSpec> {
    let mut builder = PipelineBuilder::new();
    builder.set_default_target(cfg.config.default_target.clone());
    for (name, task) in &cfg.task {
        builder.add_task(task_decl(name, task));
    }
    builder.build()
}

fn task_decl(name: &str, task: &TaskConfig) -> TaskDecl {
    let mut decl = TaskDecl::new(name, task.kind).mode(task.mode);

    // Aggregate tasks (only `follows`) have no command.
    if !task.cmd.is_empty() {
        decl = decl.command(task.cmd.iter().cloned());
    }

    for upstream in &task.from {
        decl = decl.from_task(upstream.clone());
    }
    for pattern in &task.input {
        decl = decl.input(pattern.clone());
    }
    for upstream in &task.add_inputs {
        decl = decl.add_inputs(upstream.clone());
    }
    for prerequisite in &task.follows {
        decl = decl.follows(prerequisite.clone());
    }
    if let Some(regex) = &task.regex {
        decl = decl.regex(regex.clone());
    }
    if let Some(output) = &task.output {
        decl = decl.output(output.clone());
    }
    if let Some(cpus) = task.cpus {
        decl = decl.cpus(cpus);
    }
    if let Some(memory) = &task.memory {
        decl = decl.memory(memory.clone());
    }
    decl
}

/// Cluster polling and retry settings from `[config]`.
pub fn retry_policy(section: &ConfigSection) -> RetryPolicy {
    RetryPolicy {
        retries: section.retries,
        poll_initial: Duration::from_millis(section.poll_initial_ms),
        poll_max: Duration::from_millis(section.poll_max_ms),
        queue_timeout: section.queue_timeout_secs.map(Duration::from_secs),
    }
}

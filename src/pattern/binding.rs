// src/pattern/binding.rs

//! Arity rules: how a task's resolved primary inputs become instances.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::errors::{PipedagError, Result};
use crate::fs::FileSystem;
use crate::pattern::overlap::Shape;
use crate::pattern::{normalize, path_str, Captures, InputSelector, Template};
use crate::types::TaskKind;

/// Declared output of a task, one variant per arity.
#[derive(Debug, Clone)]
pub enum OutputSpec {
    /// Split: outputs are whatever matches this glob after the body runs.
    Discovered(InputSelector),
    /// Transform: one output per input, rendered from captures.
    Derived(Template),
    /// Merge: a single fixed output path.
    Fixed(PathBuf),
    /// Aggregate: no outputs, the task only waits for its `follows`.
    Nothing,
}

impl OutputSpec {
    /// Every path this output can take, used to infer dependencies.
    pub fn shape(&self) -> Shape {
        match self {
            OutputSpec::Discovered(sel) => sel.shape(),
            OutputSpec::Derived(t) => t.shape(),
            OutputSpec::Fixed(p) => Shape::literal(&path_str(p)),
            OutputSpec::Nothing => Shape::empty(),
        }
    }

    /// Human readable form, as declared.
    pub fn describe(&self) -> String {
        match self {
            OutputSpec::Discovered(sel) => sel.pattern(),
            OutputSpec::Derived(t) => t.source().to_string(),
            OutputSpec::Fixed(p) => path_str(p),
            OutputSpec::Nothing => "(none)".to_string(),
        }
    }
}

/// A concrete (inputs -> outputs) binding for one task instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub inputs: Vec<PathBuf>,
    /// Planned outputs (Transform/Merge) or currently existing matches of
    /// the output glob (Split).
    pub outputs: Vec<PathBuf>,
    pub captures: Captures,
}

/// Apply the arity rule of `kind` to the resolved primary and extra inputs.
///
/// - Transform: one binding per primary input that passes `regex`; zero
///   primaries yield zero bindings.
/// - Merge: exactly one binding; zero primaries is an error.
/// - Split: exactly one binding whose outputs are the current matches of
///   the output glob; zero primaries is an error.
/// - Aggregate (a merge without output): exactly one empty binding.
#[allow(clippy::too_many_arguments)]
pub fn bind(
    task: &str,
    kind: TaskKind,
    regex: Option<&Regex>,
    output: &OutputSpec,
    primaries: &[PathBuf],
    extras: &[PathBuf],
    fs: &dyn FileSystem,
    root: &Path,
) -> Result<Vec<Binding>> {
    let bindings = match (kind, output) {
        (TaskKind::Transform, OutputSpec::Derived(template)) => {
            let mut bindings = Vec::with_capacity(primaries.len());
            for input in primaries {
                let Some(captures) = Captures::from_input(input, regex) else {
                    debug!(task, input = %path_str(input), "input does not match regex; skipping");
                    continue;
                };
                let rendered = template
                    .render(|name| captures.get(name).map(str::to_string))
                    .map_err(|missing| {
                        PipedagError::PatternResolution(format!(
                            "task '{task}': output template '{}' has no value for '{{{missing}}}' (input {})",
                            template.source(),
                            path_str(input),
                        ))
                    })?;
                let mut inputs = vec![input.clone()];
                inputs.extend(extras.iter().cloned());
                bindings.push(Binding {
                    inputs,
                    outputs: vec![normalize(Path::new(&rendered))],
                    captures,
                });
            }
            bindings
        }
        (TaskKind::Merge, OutputSpec::Fixed(path)) => {
            if primaries.is_empty() {
                return Err(PipedagError::PatternResolution(format!(
                    "task '{task}': merge matched zero inputs"
                )));
            }
            let mut inputs = primaries.to_vec();
            inputs.extend(extras.iter().cloned());
            vec![Binding {
                inputs,
                outputs: vec![path.clone()],
                captures: Captures::default(),
            }]
        }
        (TaskKind::Merge, OutputSpec::Nothing) => vec![Binding {
            inputs: Vec::new(),
            outputs: Vec::new(),
            captures: Captures::default(),
        }],
        (TaskKind::Split, OutputSpec::Discovered(selector)) => {
            if primaries.is_empty() {
                return Err(PipedagError::PatternResolution(format!(
                    "task '{task}': split matched zero inputs"
                )));
            }
            let mut inputs = primaries.to_vec();
            inputs.extend(extras.iter().cloned());
            let outputs = selector.resolve(fs, root)?;
            vec![Binding {
                inputs,
                outputs,
                captures: Captures::default(),
            }]
        }
        (kind, output) => {
            return Err(PipedagError::ConfigError(format!(
                "task '{task}': output '{}' is not valid for a {kind} task",
                output.describe()
            )));
        }
    };

    let mut seen = HashSet::new();
    for binding in &bindings {
        for out in &binding.outputs {
            if !seen.insert(out.clone()) {
                return Err(PipedagError::PatternResolution(format!(
                    "task '{task}': two instances map to the same output {}",
                    path_str(out)
                )));
            }
        }
    }

    Ok(bindings)
}

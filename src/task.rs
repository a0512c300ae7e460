// src/task.rs

//! Task declarations.
//!
//! A [`TaskDecl`] is the raw, unchecked description of a task (what the
//! TOML file or a library user writes). [`PipelineBuilder::build`] compiles
//! every declaration into an immutable [`TaskSpec`], checks references and
//! builds the task-level [`TaskGraph`] (which rejects cycles).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::config::params::ParameterSet;
use crate::dag::TaskGraph;
use crate::errors::{PipedagError, Result};
use crate::pattern::{normalize, path_str, Captures, InputSelector, OutputSpec, Template};
use crate::types::{ExecMode, TaskKind};

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Captures that every input path provides, with or without a regex.
const BUILTIN_CAPTURES: &[&str] = &["path", "basename", "stem", "ext", "dir"];

/// Everything a task body gets to see for one instance.
///
/// Paths are joined onto the pipeline root. `outputs` are the staging paths
/// the body must write; they are renamed into place after success. Split
/// bodies get no `outputs` and write into `output_dir` instead.
#[derive(Debug, Clone)]
pub struct BodyContext {
    pub task: TaskName,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub captures: Captures,
    pub params: Arc<ParameterSet>,
    pub workdir: PathBuf,
}

impl BodyContext {
    pub fn input(&self) -> Option<&Path> {
        self.inputs.first().map(PathBuf::as_path)
    }

    pub fn output(&self) -> Option<&Path> {
        self.outputs.first().map(PathBuf::as_path)
    }

    pub fn param(&self, key: &str) -> Result<&str> {
        self.params.get(key)
    }
}

/// An in-process task body.
pub trait NativeTask: Send + Sync {
    fn run(&self, ctx: &BodyContext) -> anyhow::Result<()>;
}

impl<F> NativeTask for F
where
    F: Fn(&BodyContext) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, ctx: &BodyContext) -> anyhow::Result<()> {
        self(ctx)
    }
}

/// argv built from templates; never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<Template>,
}

impl CommandTemplate {
    pub fn parse<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        if argv.is_empty() {
            return Err(PipedagError::ConfigError("command must not be empty".into()));
        }
        let argv = argv
            .iter()
            .map(|a| Template::parse(a.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { argv })
    }

    pub fn templates(&self) -> &[Template] {
        &self.argv
    }

    /// Render the argv for one instance.
    ///
    /// `{inputs}` / `{outputs}` as a whole element expand to one element per
    /// path; anywhere else they are joined with spaces. `{param:KEY}` looks up
    /// the parameter set and fails with [`PipedagError::ConfigKey`].
    pub fn render(&self, ctx: &BodyContext) -> Result<Vec<String>> {
        let mut argv = Vec::with_capacity(self.argv.len());
        for template in &self.argv {
            match template.whole_placeholder() {
                Some("inputs") => {
                    argv.extend(ctx.inputs.iter().map(|p| path_str(p)));
                    continue;
                }
                Some("outputs") => {
                    argv.extend(ctx.outputs.iter().map(|p| path_str(p)));
                    continue;
                }
                _ => {}
            }

            let mut param_error = None;
            let rendered = template.render(|name| match lookup(ctx, name) {
                Ok(value) => value,
                Err(e) => {
                    param_error.get_or_insert(e);
                    None
                }
            });
            if let Some(e) = param_error {
                return Err(e);
            }
            let rendered = rendered.map_err(|missing| {
                PipedagError::TaskFailure {
                    task: ctx.task.clone(),
                    reason: format!(
                        "placeholder '{{{missing}}}' in argument '{}' has no value",
                        template.source()
                    ),
                }
            })?;
            argv.push(rendered);
        }
        Ok(argv)
    }
}

fn lookup(ctx: &BodyContext, name: &str) -> Result<Option<String>> {
    if let Some(key) = name.strip_prefix("param:") {
        return ctx.params.get(key).map(|v| Some(v.to_string()));
    }
    let joined = |paths: &[PathBuf]| {
        paths.iter().map(|p| path_str(p)).collect::<Vec<_>>().join(" ")
    };
    Ok(match name {
        "input" => ctx.input().map(path_str),
        "inputs" => Some(joined(&ctx.inputs)),
        "output" => ctx.output().map(path_str),
        "outputs" => Some(joined(&ctx.outputs)),
        "output_dir" => ctx.output_dir.as_deref().map(path_str),
        other => ctx.captures.get(other).map(str::to_string),
    })
}

/// The unit of work of a task.
#[derive(Clone)]
pub enum TaskBody {
    Command(CommandTemplate),
    Native(Arc<dyn NativeTask>),
    /// Aggregate tasks: succeeds without doing anything.
    Noop,
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskBody::Command(cmd) => {
                let argv: Vec<&str> = cmd.templates().iter().map(Template::source).collect();
                f.debug_tuple("Command").field(&argv).finish()
            }
            TaskBody::Native(_) => f.write_str("Native(..)"),
            TaskBody::Noop => f.write_str("Noop"),
        }
    }
}

/// Resource hints forwarded to the cluster collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpus: Option<u32>,
    pub memory: Option<String>,
}

/// Immutable, validated task definition.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: TaskName,
    pub kind: TaskKind,
    /// Upstream tasks whose outputs are primary inputs.
    pub from: Vec<TaskName>,
    /// Glob / literal primary inputs.
    pub inputs: Vec<InputSelector>,
    /// Transform only: filter and capture regex.
    pub regex: Option<Regex>,
    /// Upstream tasks whose outputs are appended to every instance.
    pub add_inputs: Vec<TaskName>,
    pub output: OutputSpec,
    /// Ordering-only prerequisites.
    pub follows: Vec<TaskName>,
    pub body: TaskBody,
    pub mode: ExecMode,
    pub resources: Resources,
}

impl TaskSpec {
    pub fn split(name: impl Into<TaskName>) -> TaskDecl {
        TaskDecl::new(name, TaskKind::Split)
    }

    pub fn transform(name: impl Into<TaskName>) -> TaskDecl {
        TaskDecl::new(name, TaskKind::Transform)
    }

    pub fn merge(name: impl Into<TaskName>) -> TaskDecl {
        TaskDecl::new(name, TaskKind::Merge)
    }

    /// A task without inputs, outputs or body that only groups its
    /// `follows` prerequisites under one target name.
    pub fn aggregate(name: impl Into<TaskName>) -> TaskDecl {
        TaskDecl::new(name, TaskKind::Merge)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.output, OutputSpec::Nothing)
    }

    /// Tasks whose outputs feed this one directly (`from` + `add_inputs`).
    pub fn explicit_data_deps(&self) -> impl Iterator<Item = &TaskName> {
        self.from.iter().chain(self.add_inputs.iter())
    }
}

/// Unchecked task declaration.
#[derive(Clone)]
pub struct TaskDecl {
    pub name: TaskName,
    pub kind: TaskKind,
    pub from: Vec<TaskName>,
    pub input: Vec<String>,
    pub regex: Option<String>,
    pub add_inputs: Vec<TaskName>,
    pub output: Option<String>,
    pub follows: Vec<TaskName>,
    pub cmd: Option<Vec<String>>,
    pub native: Option<Arc<dyn NativeTask>>,
    pub mode: ExecMode,
    pub resources: Resources,
}

impl fmt::Debug for TaskDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl TaskDecl {
    pub fn new(name: impl Into<TaskName>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            from: Vec::new(),
            input: Vec::new(),
            regex: None,
            add_inputs: Vec::new(),
            output: None,
            follows: Vec::new(),
            cmd: None,
            native: None,
            mode: ExecMode::Local,
            resources: Resources::default(),
        }
    }

    pub fn from_task(mut self, task: impl Into<TaskName>) -> Self {
        self.from.push(task.into());
        self
    }

    pub fn input(mut self, pattern: impl Into<String>) -> Self {
        self.input.push(pattern.into());
        self
    }

    pub fn regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    pub fn add_inputs(mut self, task: impl Into<TaskName>) -> Self {
        self.add_inputs.push(task.into());
        self
    }

    pub fn output(mut self, pattern: impl Into<String>) -> Self {
        self.output = Some(pattern.into());
        self
    }

    pub fn follows(mut self, task: impl Into<TaskName>) -> Self {
        self.follows.push(task.into());
        self
    }

    pub fn command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    pub fn native<F>(mut self, body: F) -> Self
    where
        F: Fn(&BodyContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.native = Some(Arc::new(body));
        self
    }

    pub fn mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cpus(mut self, cpus: u32) -> Self {
        self.resources.cpus = Some(cpus);
        self
    }

    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.resources.memory = Some(memory.into());
        self
    }

    /// Check and compile this declaration. Cross-task references are
    /// checked by [`PipelineBuilder::build`].
    pub fn compile(self) -> Result<TaskSpec> {
        let name = self.name;
        let err = |msg: String| PipedagError::ConfigError(format!("task '{name}': {msg}"));

        if name.trim().is_empty() {
            return Err(PipedagError::ConfigError("task name must not be empty".into()));
        }
        if self.from.is_empty() && self.input.is_empty() {
            let bare = self.output.is_none()
                && self.cmd.is_none()
                && self.native.is_none()
                && self.add_inputs.is_empty()
                && self.regex.is_none();
            if bare && !self.follows.is_empty() {
                return compile_aggregate(name, self.kind, self.follows, self.mode, self.resources);
            }
            return Err(err(
                "needs at least one `from` task or `input` pattern (or only `follows`)".into(),
            ));
        }

        let regex = match (&self.regex, self.kind) {
            (None, _) => None,
            (Some(re), TaskKind::Transform) => {
                Some(Regex::new(re).map_err(|e| err(format!("invalid regex: {e}")))?)
            }
            (Some(_), kind) => return Err(err(format!("`regex` is not allowed on a {kind} task"))),
        };

        let inputs = self
            .input
            .iter()
            .map(|p| InputSelector::parse(p).map_err(|e| err(format!("{e:#}"))))
            .collect::<Result<Vec<_>>>()?;

        let raw_output = self
            .output
            .as_deref()
            .ok_or_else(|| err("missing `output`".into()))?;
        let output = match self.kind {
            TaskKind::Split => {
                let sel = InputSelector::parse(raw_output).map_err(|e| err(format!("{e:#}")))?;
                if !sel.is_glob() {
                    return Err(err(format!(
                        "split output '{raw_output}' must be a glob pattern"
                    )));
                }
                OutputSpec::Discovered(sel)
            }
            TaskKind::Transform => {
                let template = Template::parse(raw_output)?;
                if template.placeholders().next().is_none() {
                    return Err(err(format!(
                        "transform output '{raw_output}' must use at least one placeholder"
                    )));
                }
                for placeholder in template.placeholders() {
                    if !capture_available(placeholder, regex.as_ref()) {
                        return Err(err(format!(
                            "output '{raw_output}' uses '{{{placeholder}}}' which no input can provide"
                        )));
                    }
                }
                OutputSpec::Derived(template)
            }
            TaskKind::Merge => {
                if raw_output.contains(['*', '?', '[', '{']) {
                    return Err(err(format!(
                        "merge output '{raw_output}' must be a literal path"
                    )));
                }
                OutputSpec::Fixed(normalize(Path::new(raw_output)))
            }
        };

        let body = match (self.cmd, self.native) {
            (Some(_), Some(_)) => return Err(err("has both a command and a native body".into())),
            (None, None) => return Err(err("has no body (`cmd`)".into())),
            (None, Some(native)) => TaskBody::Native(native),
            (Some(argv), None) => {
                let cmd = CommandTemplate::parse(argv.as_slice()).map_err(|e| err(e.to_string()))?;
                for template in cmd.templates() {
                    for placeholder in template.placeholders() {
                        if !command_placeholder_available(placeholder, self.kind, regex.as_ref()) {
                            return Err(err(format!(
                                "command argument '{}' uses unknown placeholder '{{{placeholder}}}'",
                                template.source()
                            )));
                        }
                    }
                }
                TaskBody::Command(cmd)
            }
        };

        debug!(task = %name, kind = %self.kind, "compiled task declaration");

        Ok(TaskSpec {
            name,
            kind: self.kind,
            from: self.from,
            inputs,
            regex,
            add_inputs: self.add_inputs,
            output,
            follows: self.follows,
            body,
            mode: self.mode,
            resources: self.resources,
        })
    }
}

fn compile_aggregate(
    name: TaskName,
    kind: TaskKind,
    follows: Vec<TaskName>,
    mode: ExecMode,
    resources: Resources,
) -> Result<TaskSpec> {
    if kind != TaskKind::Merge {
        return Err(PipedagError::ConfigError(format!(
            "task '{name}': a task with only `follows` must be a merge, not a {kind}"
        )));
    }
    debug!(task = %name, prerequisites = follows.len(), "compiled aggregate task");

    Ok(TaskSpec {
        name,
        kind,
        from: Vec::new(),
        inputs: Vec::new(),
        regex: None,
        add_inputs: Vec::new(),
        output: OutputSpec::Nothing,
        follows,
        body: TaskBody::Noop,
        mode,
        resources,
    })
}

fn capture_available(name: &str, regex: Option<&Regex>) -> bool {
    if BUILTIN_CAPTURES.contains(&name) {
        return true;
    }
    let Some(re) = regex else {
        return false;
    };
    if let Ok(idx) = name.parse::<usize>() {
        return idx < re.captures_len();
    }
    re.capture_names().flatten().any(|n| n == name)
}

fn command_placeholder_available(name: &str, kind: TaskKind, regex: Option<&Regex>) -> bool {
    if name.starts_with("param:") {
        return true;
    }
    match name {
        "input" | "inputs" => true,
        "output" | "outputs" => kind != TaskKind::Split,
        "output_dir" => kind == TaskKind::Split,
        other => kind == TaskKind::Transform && capture_available(other, regex),
    }
}

/// A fully validated pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub tasks: BTreeMap<TaskName, Arc<TaskSpec>>,
    pub graph: TaskGraph,
    pub default_target: Option<TaskName>,
}

impl PipelineSpec {
    pub fn task(&self, name: &str) -> Option<&Arc<TaskSpec>> {
        self.tasks.get(name)
    }

    /// Targets used when none is requested: the configured default, else
    /// every sink task.
    pub fn default_targets(&self) -> Vec<TaskName> {
        match &self.default_target {
            Some(t) => vec![t.clone()],
            None => self.graph.sinks(),
        }
    }
}

/// Registers task declarations and produces a [`PipelineSpec`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    decls: Vec<TaskDecl>,
    default_target: Option<TaskName>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, decl: TaskDecl) -> Self {
        self.decls.push(decl);
        self
    }

    pub fn add_task(&mut self, decl: TaskDecl) -> &mut Self {
        self.decls.push(decl);
        self
    }

    pub fn default_target(mut self, task: impl Into<TaskName>) -> Self {
        self.default_target = Some(task.into());
        self
    }

    pub fn set_default_target(&mut self, task: Option<TaskName>) -> &mut Self {
        self.default_target = task;
        self
    }

    pub fn build(self) -> Result<PipelineSpec> {
        if self.decls.is_empty() {
            return Err(PipedagError::ConfigError(
                "pipeline must contain at least one task".into(),
            ));
        }

        let mut tasks = BTreeMap::new();
        for decl in self.decls {
            let spec = decl.compile()?;
            let name = spec.name.clone();
            if tasks.insert(name.clone(), Arc::new(spec)).is_some() {
                return Err(PipedagError::ConfigError(format!(
                    "task '{name}' is declared more than once"
                )));
            }
        }

        validate_references(&tasks)?;

        if let Some(target) = &self.default_target {
            if !tasks.contains_key(target) {
                return Err(PipedagError::TaskNotFound(target.clone()));
            }
        }

        let graph = TaskGraph::build(&tasks)?;

        Ok(PipelineSpec {
            tasks,
            graph,
            default_target: self.default_target,
        })
    }
}

fn validate_references(tasks: &BTreeMap<TaskName, Arc<TaskSpec>>) -> Result<()> {
    let mut claimed_outputs: BTreeMap<String, &str> = BTreeMap::new();

    for (name, spec) in tasks {
        let refs = [
            ("from", &spec.from),
            ("add_inputs", &spec.add_inputs),
            ("follows", &spec.follows),
        ];
        for (field, list) in refs {
            let mut seen = BTreeSet::new();
            for dep in list.iter() {
                if dep == name {
                    return Err(PipedagError::ConfigError(format!(
                        "task '{name}' cannot reference itself in `{field}`"
                    )));
                }
                if !tasks.contains_key(dep) {
                    return Err(PipedagError::ConfigError(format!(
                        "task '{name}' has unknown task '{dep}' in `{field}`"
                    )));
                }
                if !seen.insert(dep) {
                    return Err(PipedagError::ConfigError(format!(
                        "task '{name}' lists '{dep}' twice in `{field}`"
                    )));
                }
            }
        }

        if let OutputSpec::Fixed(path) = &spec.output {
            let key = path_str(path);
            if let Some(other) = claimed_outputs.insert(key.clone(), name) {
                return Err(PipedagError::PatternResolution(format!(
                    "tasks '{other}' and '{name}' both declare output {key}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Captures;

    fn ctx(params: ParameterSet) -> BodyContext {
        BodyContext {
            task: "pyseer".into(),
            inputs: vec![PathBuf::from("phenos/p1.tsv"), PathBuf::from("kmers.txt.gz")],
            outputs: vec![PathBuf::from("associations/.p1.assoc.pipedag-tmp")],
            output_dir: None,
            captures: Captures::from_input(Path::new("phenos/p1.tsv"), None).unwrap(),
            params: Arc::new(params),
            workdir: PathBuf::from("."),
        }
    }

    #[test]
    fn whole_element_inputs_expand_to_many_arguments() {
        let cmd = CommandTemplate::parse(&["cat", "{inputs}", "--out={output}"]).unwrap();
        let argv = cmd.render(&ctx(ParameterSet::new())).unwrap();
        assert_eq!(
            argv,
            vec![
                "cat",
                "phenos/p1.tsv",
                "kmers.txt.gz",
                "--out=associations/.p1.assoc.pipedag-tmp"
            ]
        );
    }

    #[test]
    fn parameters_are_looked_up_not_interpolated_blindly() {
        let cmd = CommandTemplate::parse(&["pyseer", "--cpu", "{param:pyseer_cpu}"]).unwrap();
        let argv = cmd
            .render(&ctx(ParameterSet::from_pairs([("pyseer_cpu", "4")])))
            .unwrap();
        assert_eq!(argv[2], "4");

        let cmd = CommandTemplate::parse(&["test", "{param:test_cool}"]).unwrap();
        let err = cmd.render(&ctx(ParameterSet::new())).unwrap_err();
        assert!(matches!(err, PipedagError::ConfigKey(ref k) if k == "test_cool"));
    }

    #[test]
    fn a_rendered_value_with_spaces_stays_one_argument() {
        let cmd = CommandTemplate::parse(&["echo", "{param:msg}"]).unwrap();
        let argv = cmd
            .render(&ctx(ParameterSet::from_pairs([("msg", "a b; rm -rf /")])))
            .unwrap();
        assert_eq!(argv, vec!["echo", "a b; rm -rf /"]);
    }

    #[test]
    fn transform_output_must_use_known_captures() {
        let err = TaskSpec::transform("A")
            .input("raw/*.txt")
            .output("out/{sample}.txt")
            .command(["true"])
            .compile()
            .unwrap_err();
        assert!(err.to_string().contains("sample"));

        TaskSpec::transform("A")
            .input("raw/*.txt")
            .regex(r"raw/(?P<sample>.*)\.txt")
            .output("out/{sample}.txt")
            .command(["true"])
            .compile()
            .unwrap();
    }

    #[test]
    fn regex_only_on_transform() {
        let err = TaskSpec::merge("M")
            .input("raw/*.txt")
            .regex("x")
            .output("all.txt")
            .command(["true"])
            .compile()
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let err = PipelineBuilder::new()
            .task(
                TaskSpec::merge("M")
                    .from_task("missing")
                    .output("all.txt")
                    .command(["true"]),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown task 'missing'"));
    }

    #[test]
    fn follows_only_task_compiles_to_an_aggregate() {
        let spec = TaskSpec::aggregate("full").follows("A").follows("M").compile().unwrap();
        assert!(spec.is_aggregate());
        assert!(matches!(spec.body, TaskBody::Noop));
        assert_eq!(spec.follows, vec!["A".to_string(), "M".to_string()]);

        let err = TaskSpec::merge("empty").compile().unwrap_err();
        assert!(err.to_string().contains("only `follows`"));

        let err = TaskSpec::aggregate("half")
            .follows("A")
            .output("x.txt")
            .compile()
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = TaskSpec::split("s").follows("A").compile().unwrap_err();
        assert!(err.to_string().contains("must be a merge"));
    }

    #[test]
    fn duplicate_merge_outputs_are_rejected() {
        let err = PipelineBuilder::new()
            .task(TaskSpec::merge("M1").input("a/*").output("all.txt").command(["true"]))
            .task(TaskSpec::merge("M2").input("b/*").output("./all.txt").command(["true"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipedagError::PatternResolution(_)));
    }
}

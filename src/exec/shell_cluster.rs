// src/exec/shell_cluster.rs

//! [`ClusterClient`] that drives a batch scheduler through its command line
//! tools. The defaults target SLURM (`sbatch` / `sacct` / `scancel`); every
//! command is a template so other queues can be configured.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::pattern::Template;

use super::cluster::{BoxFuture, ClusterClient, JobSpec, JobStatus};

/// Command templates and state vocabulary of the batch scheduler.
///
/// Placeholders: `{script}`, `{name}`, `{cpus}`, `{memory}`, `{workdir}` in
/// `submit`; `{job}` in `status` and `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusterCommands {
    pub submit: Vec<String>,
    pub status: Vec<String>,
    pub cancel: Vec<String>,
    pub pending_states: Vec<String>,
    pub running_states: Vec<String>,
    pub succeeded_states: Vec<String>,
    pub default_cpus: u32,
    pub default_memory: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClusterCommands {
    fn default() -> Self {
        Self {
            submit: strings(&[
                "sbatch",
                "--parsable",
                "--job-name={name}",
                "--cpus-per-task={cpus}",
                "--mem={memory}",
                "{script}",
            ]),
            status: strings(&["sacct", "-n", "-X", "-P", "-j", "{job}", "--format=State,ExitCode"]),
            cancel: strings(&["scancel", "{job}"]),
            pending_states: strings(&["PENDING", "CONFIGURING", "REQUEUED", "SUSPENDED"]),
            running_states: strings(&["RUNNING", "COMPLETING"]),
            succeeded_states: strings(&["COMPLETED"]),
            default_cpus: 1,
            default_memory: "1G".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ShellClusterClient {
    commands: ClusterCommands,
    /// Where job scripts are written.
    jobs_dir: PathBuf,
    counter: AtomicU64,
}

impl ShellClusterClient {
    pub fn new(commands: ClusterCommands, jobs_dir: PathBuf) -> Self {
        Self {
            commands,
            jobs_dir,
            counter: AtomicU64::new(0),
        }
    }

    fn write_script(&self, job: &JobSpec) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.jobs_dir)
            .with_context(|| format!("creating job script dir {:?}", self.jobs_dir))?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.jobs_dir.join(format!("{}-{n}.sh", sanitize(&job.name)));
        std::fs::write(&path, job_script(job))
            .with_context(|| format!("writing job script {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("making {:?} executable", path))?;
        }
        Ok(path)
    }

    fn parse_status(&self, stdout: &str) -> JobStatus {
        let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            // Freshly submitted jobs may not be visible to accounting yet.
            return JobStatus::Pending;
        };
        let mut fields = line.split(|c: char| c == '|' || c.is_whitespace()).filter(|f| !f.is_empty());
        let state = fields.next().unwrap_or_default().trim_end_matches('+').to_uppercase();
        let has = |list: &[String]| list.iter().any(|s| s.eq_ignore_ascii_case(&state));

        if has(&self.commands.pending_states) {
            JobStatus::Pending
        } else if has(&self.commands.running_states) {
            JobStatus::Running
        } else if has(&self.commands.succeeded_states) {
            JobStatus::Succeeded
        } else {
            // A non-success state with exit code 0 (e.g. killed by a signal) still fails.
            let code = fields.find_map(parse_exit_code).filter(|c| *c != 0);
            JobStatus::Failed(code.unwrap_or(1))
        }
    }
}

impl ClusterClient for ShellClusterClient {
    fn submit<'a>(&'a self, job: &'a JobSpec) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let script = self.write_script(job)?;
            let cpus = job.resources.cpus.unwrap_or(self.commands.default_cpus).to_string();
            let memory = job
                .resources
                .memory
                .clone()
                .unwrap_or_else(|| self.commands.default_memory.clone());
            let script = script.to_string_lossy().into_owned();
            let workdir = job.workdir.to_string_lossy().into_owned();
            let argv = render(&self.commands.submit, |name| match name {
                "script" => Some(script.clone()),
                "name" => Some(job.name.clone()),
                "cpus" => Some(cpus.clone()),
                "memory" => Some(memory.clone()),
                "workdir" => Some(workdir.clone()),
                _ => None,
            })?;
            let stdout = run_tool(&argv, &job.workdir).await?;
            parse_job_id(&stdout).ok_or_else(|| anyhow!("no job id in submit output: {stdout:?}"))
        })
    }

    fn poll<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, Result<JobStatus>> {
        Box::pin(async move {
            let argv = render(&self.commands.status, |name| (name == "job").then(|| job_id.to_string()))?;
            let stdout = run_tool(&argv, Path::new(".")).await?;
            Ok(self.parse_status(&stdout))
        })
    }

    fn cancel<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let argv = render(&self.commands.cancel, |name| (name == "job").then(|| job_id.to_string()))?;
            run_tool(&argv, Path::new(".")).await.map(|_| ())
        })
    }
}

fn render<F>(templates: &[String], lookup: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    templates
        .iter()
        .map(|t| {
            let template = Template::parse(t)?;
            template
                .render(&lookup)
                .map_err(|missing| anyhow!("unknown placeholder {{{missing}}} in cluster command '{t}'"))
        })
        .collect()
}

async fn run_tool(argv: &[String], workdir: &Path) -> Result<String> {
    let (program, args) = argv.split_first().context("empty cluster command")?;
    debug!(cmd = %argv.join(" "), "running cluster tool");
    let output = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("running '{program}'"))?;
    if !output.status.success() {
        bail!(
            "'{}' failed ({}): {}",
            argv.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The job id is the last token of the submit output, cut at `;`
/// (`sbatch --parsable` prints `id;cluster`).
fn parse_job_id(stdout: &str) -> Option<String> {
    let token = stdout.split_whitespace().last()?;
    let id = token.split(';').next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Accepts `N` or `N:M` (exit code and signal).
fn parse_exit_code(field: &str) -> Option<i32> {
    field.split(':').next()?.parse().ok()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

fn job_script(job: &JobSpec) -> String {
    let argv: Vec<String> = job.argv.iter().map(|a| shell_quote(a)).collect();
    format!(
        "#!/bin/sh\ncd {} || exit 1\nexec {}\n",
        shell_quote(&job.workdir.to_string_lossy()),
        argv.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Resources;

    fn client() -> ShellClusterClient {
        ShellClusterClient::new(ClusterCommands::default(), PathBuf::from("jobs"))
    }

    #[test]
    fn job_ids_from_parsable_output() {
        assert_eq!(parse_job_id("12345\n").as_deref(), Some("12345"));
        assert_eq!(parse_job_id("12345;cluster\n").as_deref(), Some("12345"));
        assert_eq!(parse_job_id("Submitted batch job 77\n").as_deref(), Some("77"));
        assert_eq!(parse_job_id("  \n"), None);
    }

    #[test]
    fn sacct_states_map_to_job_status() {
        let c = client();
        assert_eq!(c.parse_status(""), JobStatus::Pending);
        assert_eq!(c.parse_status("PENDING|0:0\n"), JobStatus::Pending);
        assert_eq!(c.parse_status("RUNNING|0:0\n"), JobStatus::Running);
        assert_eq!(c.parse_status("COMPLETED|0:0\n"), JobStatus::Succeeded);
        assert_eq!(c.parse_status("FAILED|2:0\n"), JobStatus::Failed(2));
        assert_eq!(c.parse_status("CANCELLED+|0:15\n"), JobStatus::Failed(1));
        assert_eq!(c.parse_status("TIMEOUT\n"), JobStatus::Failed(1));
    }

    #[test]
    fn script_quotes_arguments() {
        let job = JobSpec {
            name: "align-3".into(),
            argv: vec!["echo".into(), "it's".into()],
            workdir: PathBuf::from("/data/run"),
            resources: Resources::default(),
        };
        assert_eq!(
            job_script(&job),
            "#!/bin/sh\ncd '/data/run' || exit 1\nexec 'echo' 'it'\\''s'\n"
        );
    }

    #[test]
    fn unknown_placeholder_in_command_is_an_error() {
        let err = render(&strings(&["qsub", "{queue}"]), |_| None).unwrap_err();
        assert!(err.to_string().contains("{queue}"));
    }

    #[test]
    fn names_are_sanitized_for_script_files() {
        assert_eq!(sanitize("align/sample 1"), "align_sample_1");
    }
}

// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{ConfigFile, RawConfigFile, RawTaskConfig, TaskConfig};
use crate::errors::{PipedagError, Result};
use crate::types::{ExecMode, TaskKind};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let mut tasks = BTreeMap::new();
        for (name, task) in raw.task {
            let checked = check_task(&name, task)?;
            tasks.insert(name, checked);
        }

        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.cluster.unwrap_or_default(),
            tasks,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_cluster_commands(cfg)?;
    validate_task_references(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(PipedagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    let c = &cfg.config;

    if c.concurrency == 0 {
        return Err(PipedagError::ConfigError(
            "[config].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    if c.poll_initial_ms == 0 {
        return Err(PipedagError::ConfigError(
            "[config].poll_initial_ms must be >= 1".to_string(),
        ));
    }

    if c.poll_initial_ms > c.poll_max_ms {
        return Err(PipedagError::ConfigError(format!(
            "[config].poll_initial_ms ({}) must not exceed poll_max_ms ({})",
            c.poll_initial_ms, c.poll_max_ms
        )));
    }

    if let Some(target) = &c.default_target {
        if !cfg.task.contains_key(target) {
            return Err(PipedagError::ConfigError(format!(
                "[config].default_target names unknown task '{target}'"
            )));
        }
    }

    Ok(())
}

fn validate_cluster_commands(cfg: &RawConfigFile) -> Result<()> {
    let Some(cluster) = &cfg.cluster else {
        return Ok(());
    };
    for (key, argv) in [
        ("submit", &cluster.submit),
        ("status", &cluster.status),
        ("cancel", &cluster.cancel),
    ] {
        if argv.is_empty() {
            return Err(PipedagError::ConfigError(format!(
                "[cluster].{key} must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_task_references(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        let refs = [
            ("from", &task.from),
            ("add_inputs", &task.add_inputs),
            ("follows", &task.follows),
        ];
        for (field, deps) in refs {
            for dep in deps.iter() {
                if dep == name {
                    return Err(PipedagError::ConfigError(format!(
                        "task '{name}' cannot reference itself in `{field}`"
                    )));
                }
                if !cfg.task.contains_key(dep) {
                    return Err(PipedagError::ConfigError(format!(
                        "task '{name}' has unknown task '{dep}' in `{field}`"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn check_task(name: &str, raw: RawTaskConfig) -> Result<TaskConfig> {
    let err = |msg: String| PipedagError::ConfigError(format!("task '{name}': {msg}"));

    let kind: TaskKind = raw.kind.parse().map_err(err)?;
    let mode = match raw.mode.as_deref() {
        Some(m) => m.parse::<ExecMode>().map_err(err)?,
        None => ExecMode::default(),
    };
    let aggregate = !raw.follows.is_empty()
        && raw.from.is_empty()
        && raw.input.is_empty()
        && raw.output.is_none();
    if raw.cmd.is_empty() && !aggregate {
        return Err(err("`cmd` must be a non-empty argv list".to_string()));
    }
    if raw.cpus == Some(0) {
        return Err(err("`cpus` must be >= 1".to_string()));
    }

    Ok(TaskConfig {
        kind,
        from: raw.from,
        input: raw.input,
        regex: raw.regex,
        add_inputs: raw.add_inputs,
        output: raw.output,
        follows: raw.follows,
        cmd: raw.cmd,
        mode,
        cpus: raw.cpus,
        memory: raw.memory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(text)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(
            r#"
            [task.up]
            kind = "transform"
            input = "raw/*.txt"
            output = "out/{stem}.up"
            cmd = ["tr", "a-z", "A-Z"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.config.concurrency, 1);
        assert_eq!(cfg.cluster.submit[0], "sbatch");
        let up = &cfg.task["up"];
        assert_eq!(up.kind, TaskKind::Transform);
        assert_eq!(up.input, vec!["raw/*.txt".to_string()]);
        assert_eq!(up.mode, ExecMode::Local);
    }

    #[test]
    fn no_tasks_is_rejected() {
        assert!(matches!(parse(""), Err(PipedagError::ConfigError(_))));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = parse(
            r#"
            [config]
            concurrency = 0
            [task.a]
            kind = "merge"
            input = "x"
            output = "y"
            cmd = ["true"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let err = parse(
            r#"
            [task.a]
            kind = "merge"
            from = "ghost"
            output = "y"
            cmd = ["true"]
            "#,
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn bad_kind_and_empty_cmd_are_rejected() {
        let bad_kind = parse(
            r#"
            [task.a]
            kind = "fanout"
            input = "x"
            cmd = ["true"]
            "#,
        )
        .unwrap_err();
        assert!(bad_kind.to_string().contains("invalid task kind"));

        let empty = parse(
            r#"
            [task.a]
            kind = "merge"
            input = "x"
            output = "y"
            cmd = []
            "#,
        )
        .unwrap_err();
        assert!(empty.to_string().contains("non-empty"));
    }

    #[test]
    fn follows_only_task_needs_no_cmd() {
        let cfg = parse(
            r#"
            [task.a]
            kind = "merge"
            input = "x"
            output = "y"
            cmd = ["true"]

            [task.full]
            kind = "merge"
            follows = ["a"]
            "#,
        )
        .unwrap();
        assert!(cfg.task["full"].cmd.is_empty());

        let err = parse(
            r#"
            [task.a]
            kind = "merge"
            input = "x"
            output = "y"
            follows = "b"

            [task.b]
            kind = "merge"
            input = "x"
            output = "z"
            cmd = ["true"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn custom_cluster_commands_override_defaults() {
        let cfg = parse(
            r#"
            [cluster]
            submit = ["qsub", "{script}"]
            status = ["qstat", "{job}"]
            cancel = ["qdel", "{job}"]

            [task.a]
            kind = "merge"
            input = "x"
            output = "y"
            cmd = ["true"]
            mode = "cluster"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cluster.submit, vec!["qsub", "{script}"]);
        // Unspecified keys keep their defaults.
        assert_eq!(cfg.cluster.succeeded_states, vec!["COMPLETED"]);
        assert_eq!(cfg.task["a"].mode, ExecMode::Cluster);
    }
}

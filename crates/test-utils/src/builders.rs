#![allow(dead_code)]

use std::path::Path;

use pipedag::config::{ConfigFile, RawConfigFile, RawTaskConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_task(mut self, name: &str, task: RawTaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.config.concurrency = n;
        self
    }

    pub fn default_target(mut self, task: &str) -> Self {
        self.config.config.default_target = Some(task.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `RawTaskConfig`.
pub struct TaskConfigBuilder {
    task: RawTaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(kind: &str, cmd: &[&str]) -> Self {
        Self {
            task: RawTaskConfig {
                kind: kind.to_string(),
                cmd: cmd.iter().map(|s| s.to_string()).collect(),
                ..RawTaskConfig::default()
            },
        }
    }

    pub fn split(cmd: &[&str]) -> Self {
        Self::new("split", cmd)
    }

    pub fn transform(cmd: &[&str]) -> Self {
        Self::new("transform", cmd)
    }

    pub fn merge(cmd: &[&str]) -> Self {
        Self::new("merge", cmd)
    }

    pub fn input(mut self, pattern: &str) -> Self {
        self.task.input.push(pattern.to_string());
        self
    }

    pub fn from_task(mut self, task: &str) -> Self {
        self.task.from.push(task.to_string());
        self
    }

    pub fn add_inputs(mut self, task: &str) -> Self {
        self.task.add_inputs.push(task.to_string());
        self
    }

    pub fn follows(mut self, task: &str) -> Self {
        self.task.follows.push(task.to_string());
        self
    }

    pub fn regex(mut self, regex: &str) -> Self {
        self.task.regex = Some(regex.to_string());
        self
    }

    pub fn output(mut self, pattern: &str) -> Self {
        self.task.output = Some(pattern.to_string());
        self
    }

    pub fn mode(mut self, mode: &str) -> Self {
        self.task.mode = Some(mode.to_string());
        self
    }

    pub fn build(self) -> RawTaskConfig {
        self.task
    }
}

/// Write a pipeline file into `dir` and return its path.
pub fn write_pipeline(dir: &Path, toml: &str) -> std::path::PathBuf {
    let path = dir.join("Pipedag.toml");
    std::fs::write(&path, toml).expect("write pipeline file");
    path
}

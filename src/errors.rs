// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Construction-time variants (configuration, cycles, pattern resolution)
//! abort a run before anything executes; the remaining variants describe
//! failures that stay local to a single task instance.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected between tasks: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("Pattern resolution error: {0}")]
    PatternResolution(String),

    #[error("Undefined parameter: {0}")]
    ConfigKey(String),

    #[error("Transient backend error: {0}")]
    BackendTransient(String),

    #[error("Task '{task}' failed: {reason}")]
    TaskFailure { task: String, reason: String },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipedagError {
    /// Process exit code for this error when it aborts the whole run.
    ///
    /// `2` for graph construction problems, `1` for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipedagError::ConfigError(_)
            | PipedagError::TaskNotFound(_)
            | PipedagError::CycleDetected(_)
            | PipedagError::PatternResolution(_)
            | PipedagError::TomlError(_) => 2,
            _ => 1,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipedagError>;

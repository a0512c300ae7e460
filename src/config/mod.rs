// src/config/mod.rs

//! Configuration loading and validation for pipedag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Validate kinds, commands and references (`validate.rs`).
//! - Compile tasks into a pipeline (`pipeline.rs`).
//! - Layered parameter files (`params.rs`).

pub mod loader;
pub mod model;
pub mod params;
pub mod pipeline;
pub mod validate;

pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, RawConfigFile, RawTaskConfig, TaskConfig};
pub use params::ParameterSet;
pub use pipeline::{pipeline_from_config, retry_policy};

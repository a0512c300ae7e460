// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{PipedagError, Result};

/// Default pipeline file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "Pipedag.toml";

/// Load a configuration file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// the checked model.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        PipedagError::ConfigError(format!("reading pipeline file {}: {e}", path.display()))
    })?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run basic validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks task kinds, commands, references and global settings.
///
/// Pattern compilation and cycle detection happen when the checked config
/// is turned into a pipeline (`config::pipeline_from_config`).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Directory that relative paths in the pipeline file are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "pipelines/Pipedag.toml"),
///   that directory is used.
/// - For a bare filename we fall back to the current working directory.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_file_name_resolves_to_cwd() {
        let root = config_root_dir(Path::new("Pipedag.toml"));
        assert_eq!(root, std::env::current_dir().unwrap());
        assert_eq!(
            config_root_dir(Path::new("pipelines/Pipedag.toml")),
            PathBuf::from("pipelines")
        );
    }

    #[test]
    fn malformed_toml_is_a_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Pipedag.toml");
        fs::write(&path, "[task.a\nkind = ").unwrap();
        let err = load_and_validate(&path).unwrap_err();
        assert!(matches!(err, PipedagError::TomlError(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = load_from_path("does/not/exist.toml").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.toml"));
        assert_eq!(err.exit_code(), 2);
    }
}

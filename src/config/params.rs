// src/config/params.rs

//! Read-only parameter store visible to every task body.
//!
//! Parameters come from layered TOML files. The first layer that defines a
//! key wins; missing layer files are skipped. Nested tables are flattened
//! with `_`, so
//!
//! ```toml
//! [fsm]
//! kmer-min = 9
//! ```
//!
//! is looked up as `fsm_kmer-min`. Every value is stored as a string.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{PipedagError, Result};

/// File name of a parameter layer searched next to the pipeline file.
pub const PARAMS_FILE_NAME: &str = "pipeline.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: BTreeMap<String, String>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit pairs (mainly for programmatic pipelines).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load every layer in order. Earlier layers take precedence.
    pub fn load_layers(layers: &[PathBuf]) -> Result<Self> {
        let mut set = Self::new();
        for layer in layers {
            if !layer.is_file() {
                debug!(path = ?layer, "parameter layer not present; skipping");
                continue;
            }
            let text = fs::read_to_string(layer)?;
            let before = set.values.len();
            set.merge_toml_str(&text).map_err(|e| {
                PipedagError::ConfigError(format!("parameter file {}: {e}", layer.display()))
            })?;
            info!(
                path = ?layer,
                new_keys = set.values.len() - before,
                "loaded parameter layer"
            );
        }
        Ok(set)
    }

    /// Merge a TOML document as a lower-priority layer: keys already present
    /// are kept.
    pub fn merge_toml_str(&mut self, text: &str) -> Result<()> {
        let table: toml::Table = toml::from_str(text)?;
        let mut flat = BTreeMap::new();
        flatten(None, &toml::Value::Table(table), &mut flat);
        for (key, value) in flat {
            self.values.entry(key).or_insert(value);
        }
        Ok(())
    }

    /// Look up a parameter. Absent keys are an error, never an empty string.
    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| PipedagError::ConfigKey(key.to_string()))
    }

    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn flatten(prefix: Option<&str>, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = match prefix {
                    Some(p) => format!("{p}_{k}"),
                    None => k.clone(),
                };
                flatten(Some(&key), v, out);
            }
        }
        other => {
            if let Some(key) = prefix {
                out.insert(key.to_string(), scalar_to_string(other));
            }
        }
    }
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Datetime(d) => d.to_string(),
        toml::Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(","),
        toml::Value::Table(_) => String::new(),
    }
}

/// The fixed search order for parameter layers.
///
/// Explicit files come first (CLI, then `[config].params`), followed by
/// `pipeline.toml` next to the pipeline file, in its parent directory and in
/// the current working directory.
pub fn default_layers(explicit: &[PathBuf], pipeline_dir: &Path, cwd: &Path) -> Vec<PathBuf> {
    let mut layers: Vec<PathBuf> = explicit.to_vec();
    layers.push(pipeline_dir.join(PARAMS_FILE_NAME));
    layers.push(pipeline_dir.join("..").join(PARAMS_FILE_NAME));
    layers.push(cwd.join(PARAMS_FILE_NAME));
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn nested_tables_flatten_with_underscore() {
        let mut set = ParameterSet::new();
        set.merge_toml_str(
            r#"
            threads = 4
            [fsm]
            kmer-min = 9
            [pyseer.lmm]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(set.get("threads").unwrap(), "4");
        assert_eq!(set.get("fsm_kmer-min").unwrap(), "9");
        assert_eq!(set.get("pyseer_lmm_enabled").unwrap(), "true");
    }

    #[test]
    fn missing_key_is_an_error() {
        let set = ParameterSet::from_pairs([("a", "1")]);
        let err = set.get("test_cool").unwrap_err();
        assert!(matches!(err, PipedagError::ConfigKey(ref k) if k == "test_cool"));
    }

    #[test]
    fn first_layer_wins_and_missing_layers_are_skipped() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        fs::write(&first, "threads = 8\n").unwrap();
        fs::write(&second, "threads = 1\nmemory = \"4G\"\n").unwrap();

        let set = ParameterSet::load_layers(&[
            dir.path().join("absent.toml"),
            first,
            second,
        ])
        .unwrap();
        assert_eq!(set.get("threads").unwrap(), "8");
        assert_eq!(set.get("memory").unwrap(), "4G");
    }

    #[test]
    fn search_order_puts_explicit_layers_first() {
        let layers = default_layers(
            &[PathBuf::from("custom.toml")],
            Path::new("/work/pipe"),
            Path::new("/home"),
        );
        assert_eq!(layers[0], PathBuf::from("custom.toml"));
        assert_eq!(layers[1], PathBuf::from("/work/pipe/pipeline.toml"));
        assert_eq!(layers[3], PathBuf::from("/home/pipeline.toml"));
    }
}

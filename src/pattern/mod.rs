// src/pattern/mod.rs

//! Pattern resolution: turning declared input/output patterns plus the
//! current filesystem state into concrete (inputs -> outputs) bindings.
//!
//! - [`selector`] matches globs / literal paths against the filesystem.
//! - [`template`] renders output names and command arguments from
//!   placeholders and regex captures.
//! - [`binding`] applies the split / transform / merge arity rules.
//! - [`overlap`] decides whether two patterns can select a common path.

pub mod binding;
pub mod overlap;
pub mod selector;
pub mod template;

use std::path::{Component, Path, PathBuf};

pub use binding::{bind, Binding, OutputSpec};
pub use overlap::Shape;
pub use selector::{collect_matching_files, InputSelector};
pub use template::{Captures, Template};

/// Normalise a relative path: drop `.` components and use `/` separators.
pub fn normalize(path: &Path) -> PathBuf {
    let s = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect::<PathBuf>()
        .to_string_lossy()
        .replace('\\', "/");
    PathBuf::from(s)
}

/// Render a path as a forward-slash string for matching and display.
pub fn path_str(path: &Path) -> String {
    normalize(path).to_string_lossy().into_owned()
}

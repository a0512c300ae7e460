// src/pattern/selector.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

use crate::fs::FileSystem;
use crate::pattern::overlap::Shape;
use crate::pattern::{normalize, path_str};

/// Suffix of staging files that hold an instance's output while it runs.
pub const STAGING_SUFFIX: &str = ".pipedag-tmp";

/// Engine state directory (ledger, job scripts); never matched by globs.
pub const STATE_DIR: &str = ".pipedag";

/// A single input selector: either a glob or a literal path.
///
/// Globs use shell semantics: `*` does not cross `/`, `**` does.
#[derive(Clone)]
pub enum InputSelector {
    Glob { pattern: String, matcher: GlobMatcher },
    Literal(PathBuf),
}

impl fmt::Debug for InputSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSelector::Glob { pattern, .. } => f.debug_tuple("Glob").field(pattern).finish(),
            InputSelector::Literal(path) => f.debug_tuple("Literal").field(path).finish(),
        }
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

impl InputSelector {
    /// Parse a pattern; anything without glob metacharacters is a literal.
    pub fn parse(pattern: &str) -> Result<Self> {
        let normal = path_str(Path::new(pattern));
        if is_glob(&normal) {
            let matcher = GlobBuilder::new(&normal)
                .literal_separator(true)
                .build()
                .with_context(|| format!("invalid glob pattern: {pattern}"))?
                .compile_matcher();
            Ok(InputSelector::Glob {
                pattern: normal,
                matcher,
            })
        } else {
            Ok(InputSelector::Literal(PathBuf::from(normal)))
        }
    }

    /// The pattern as written (normalised).
    pub fn pattern(&self) -> String {
        match self {
            InputSelector::Glob { pattern, .. } => pattern.clone(),
            InputSelector::Literal(path) => path_str(path),
        }
    }

    pub fn is_glob(&self) -> bool {
        matches!(self, InputSelector::Glob { .. })
    }

    /// Whether a relative path is selected.
    pub fn matches(&self, rel_path: &Path) -> bool {
        match self {
            InputSelector::Glob { matcher, .. } => matcher.is_match(path_str(rel_path)),
            InputSelector::Literal(path) => normalize(rel_path) == *path,
        }
    }

    /// Every path this selector can pick, for overlap checks.
    pub fn shape(&self) -> Shape {
        match self {
            InputSelector::Glob { pattern, .. } => Shape::glob(pattern),
            InputSelector::Literal(path) => Shape::literal(&path_str(path)),
        }
    }

    /// Directory that contains every possible match: the static prefix of a
    /// glob, or the parent of a literal path.
    pub fn base_dir(&self) -> PathBuf {
        match self {
            InputSelector::Glob { pattern, .. } => static_prefix(pattern),
            InputSelector::Literal(path) => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        }
    }

    /// Resolve against the filesystem under `root`.
    ///
    /// Globs return every matching file (sorted); a literal returns its own
    /// path if it exists (file or directory), otherwise nothing.
    pub fn resolve(&self, fs: &dyn FileSystem, root: &Path) -> Result<Vec<PathBuf>> {
        match self {
            InputSelector::Glob { pattern, matcher } => {
                collect_matching_files(fs, root, &static_prefix(pattern), matcher)
            }
            InputSelector::Literal(path) => {
                if fs.exists(&root.join(path)) {
                    Ok(vec![path.clone()])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }
}

/// Longest leading directory of a glob that contains no metacharacters.
fn static_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    let parts: Vec<&str> = pattern.split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        if is_glob(part) {
            break;
        }
        prefix.push(part);
    }
    prefix
}

/// Collect all files under `root/base` whose path relative to `root`
/// matches `matcher`.
///
/// Staging files and the engine state directory are skipped. Returned paths
/// are relative to `root`, normalised and sorted.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    base: &Path,
    matcher: &GlobMatcher,
) -> Result<Vec<PathBuf>> {
    let start = root.join(base);
    if !fs.is_dir(&start) {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![start];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == STATE_DIR || name.ends_with(STAGING_SUFFIX) {
                continue;
            }
            if fs.is_dir(&path) {
                stack.push(path);
            } else if fs.is_file(&path) {
                if let Ok(rel) = path.strip_prefix(root) {
                    let rel = normalize(rel);
                    if matcher.is_match(path_str(&rel)) {
                        files.push(rel);
                    }
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn fixture() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("raw/y.txt", "y");
        fs.add_file("raw/x.txt", "x");
        fs.add_file("raw/nested/z.txt", "z");
        fs.add_file("raw/.w.txt.pipedag-tmp", "partial");
        fs.add_file("notes.md", "n");
        fs
    }

    #[test]
    fn star_does_not_cross_directories() {
        let fs = fixture();
        let sel = InputSelector::parse("raw/*.txt").unwrap();
        let files = sel.resolve(&fs, Path::new(".")).unwrap();
        assert_eq!(files, vec![PathBuf::from("raw/x.txt"), PathBuf::from("raw/y.txt")]);
    }

    #[test]
    fn double_star_recurses() {
        let fs = fixture();
        let sel = InputSelector::parse("raw/**/*.txt").unwrap();
        let files = sel.resolve(&fs, Path::new(".")).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn literal_resolves_only_when_present() {
        let fs = fixture();
        let present = InputSelector::parse("./notes.md").unwrap();
        let absent = InputSelector::parse("phenos.tsv").unwrap();
        assert!(!present.is_glob());
        assert_eq!(
            present.resolve(&fs, Path::new(".")).unwrap(),
            vec![PathBuf::from("notes.md")]
        );
        assert!(absent.resolve(&fs, Path::new(".")).unwrap().is_empty());
    }

    #[test]
    fn missing_base_directory_matches_nothing() {
        let fs = fixture();
        let sel = InputSelector::parse("contigs/*.fa").unwrap();
        assert!(sel.resolve(&fs, Path::new(".")).unwrap().is_empty());
    }

    #[test]
    fn base_dir_stops_at_first_wildcard() {
        let sel = InputSelector::parse("results/*/part-*.tsv").unwrap();
        assert_eq!(sel.base_dir(), PathBuf::from("results"));
        let sel = InputSelector::parse("contigs/*.fa").unwrap();
        assert_eq!(sel.base_dir(), PathBuf::from("contigs"));
    }

    #[test]
    fn literal_and_glob_shapes_overlap() {
        let glob = InputSelector::parse("contigs/*.fa").unwrap();
        let literal = InputSelector::parse("contigs/s1.fa").unwrap();
        assert!(glob.shape().overlaps(&literal.shape()));
        assert!(!glob.shape().overlaps(&Shape::literal("contigs/s1.gff")));
    }
}

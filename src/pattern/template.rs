// src/pattern/template.rs

//! `{placeholder}` templates used for derived output names and command
//! arguments.
//!
//! ```text
//! annotations/{1}.gff        -> positional regex capture
//! out/{stem}.processed       -> file stem of the matched input
//! --prefix={sample}          -> named regex capture
//! {{literal braces}}         -> `{literal braces}`
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;

use crate::errors::{PipedagError, Result};
use crate::pattern::overlap::{Shape, Wildcard};
use crate::pattern::path_str;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    let name = name.trim().to_string();
                    if !closed || name.is_empty() {
                        return Err(PipedagError::ConfigError(format!(
                            "malformed placeholder in template '{source}'"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                '}' => {
                    return Err(PipedagError::ConfigError(format!(
                        "unmatched '}}' in template '{source}'"
                    )));
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of all placeholders in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// If the whole template is a single placeholder, return its name.
    pub fn whole_placeholder(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [Segment::Placeholder(name)] => Some(name),
            _ => None,
        }
    }

    /// Render with a lookup function. Returns the name of the first
    /// placeholder the lookup could not satisfy as the error.
    pub fn render<F>(&self, mut lookup: F) -> std::result::Result<String, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }

    /// Every path the template can render to. `stem`, `basename` and `ext`
    /// never contain a separator; other captures might.
    pub fn shape(&self) -> Shape {
        let mut shape = Shape::default();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => shape.push_literal(s),
                Segment::Placeholder(name) => shape.push_wildcard(match name.as_str() {
                    "stem" | "basename" | "ext" => Wildcard::Segment,
                    _ => Wildcard::Path,
                }),
            }
        }
        shape
    }
}

/// Named values derived from a matched input path.
///
/// Always present: `path`, `basename`, `stem`, `ext`, `dir`. With a regex,
/// every positional group is available as `0`, `1`, ... and every named
/// group under its name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    values: BTreeMap<String, String>,
}

impl Captures {
    /// Build captures for `input`. Returns `None` when a regex is given and
    /// does not match the path.
    pub fn from_input(input: &Path, regex: Option<&Regex>) -> Option<Self> {
        let text = path_str(input);
        let mut values = BTreeMap::new();

        if let Some(re) = regex {
            let caps = re.captures(&text)?;
            for (idx, group) in caps.iter().enumerate() {
                if let Some(m) = group {
                    values.insert(idx.to_string(), m.as_str().to_string());
                }
            }
            for name in re.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    values.insert(name.to_string(), m.as_str().to_string());
                }
            }
        }

        let path = Path::new(&text);
        let os = |s: Option<&std::ffi::OsStr>| {
            s.map(|v| v.to_string_lossy().into_owned()).unwrap_or_default()
        };
        values.insert("path".into(), text.clone());
        values.insert("basename".into(), os(path.file_name()));
        values.insert("stem".into(), os(path.file_stem()));
        values.insert("ext".into(), os(path.extension()));
        values.insert(
            "dir".into(),
            path.parent().map(path_str).unwrap_or_default(),
        );

        Some(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

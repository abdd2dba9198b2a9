//! Template marker parsing
//!
//! Recognized markers:
//! - `$name`
//! - `[[name]]` and `[[name:format]]`
//! - `${name}`, `${name:format}` and `${name.field}` (the field path is kept
//!   but not used for lookup)

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(\w+)|\[\[(\w+?)(?::(\w+))?\]\]|\$\{(\w+)(?:\.([^:^\}]+))?(?::([^\}]+))?\}")
        .expect("marker regex is valid")
});

/// One variable reference found in a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    /// Referenced variable name
    pub name: String,
    /// Explicit format qualifier
    pub format: Option<String>,
    /// `.field` path of a `${name.field}` marker
    pub field_path: Option<String>,
    /// Marker text exactly as written
    pub raw: String,
}

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    /// Text copied verbatim
    Literal(String),
    /// Variable reference
    Variable(VariableRef),
}

impl TemplateSegment {
    /// Original text of this segment
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Literal(text) => text,
            Self::Variable(var) => &var.raw,
        }
    }
}

fn to_ref(caps: &Captures<'_>) -> Option<VariableRef> {
    let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
    let name = group(1).or_else(|| group(2)).or_else(|| group(4))?;
    Some(VariableRef {
        name,
        format: group(3).or_else(|| group(6)),
        field_path: group(5),
        raw: caps.get(0)?.as_str().to_string(),
    })
}

/// Split `template` into literal text and variable references
///
/// Concatenating the raw text of every segment gives back `template`.
#[must_use]
pub fn parse_template(template: &str) -> Vec<TemplateSegment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in MARKER.captures_iter(template) {
        let (Some(whole), Some(var)) = (caps.get(0), to_ref(&caps)) else {
            continue;
        };
        if whole.start() > last {
            segments.push(TemplateSegment::Literal(template[last..whole.start()].to_string()));
        }
        segments.push(TemplateSegment::Variable(var));
        last = whole.end();
    }

    if last < template.len() {
        segments.push(TemplateSegment::Literal(template[last..].to_string()));
    }
    segments
}

/// Names referenced by `template`, in first-occurrence order, deduplicated
#[must_use]
pub fn referenced_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in MARKER.captures_iter(template) {
        if let Some(var) = to_ref(&caps) {
            if !names.contains(&var.name) {
                names.push(var.name);
            }
        }
    }
    names
}

/// Check if `template` contains any variable marker
#[inline]
#[must_use]
pub fn contains_markers(template: &str) -> bool {
    MARKER.is_match(template)
}

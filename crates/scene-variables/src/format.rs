//! Value formats
//!
//! A format turns a (possibly multi-valued) variable into the text spliced
//! into a template. The registry is an explicit value handed to the resolver;
//! there is no process-wide registry. `csv` is always present and is used for
//! references without a format and for unknown format names.

use crate::binding::VariableValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the fallback format
pub const DEFAULT_FORMAT: &str = "csv";

/// Input to a format function
#[derive(Debug, Clone, Copy)]
pub struct FormatInput<'a> {
    /// Variable name
    pub name: &'a str,
    /// Value to render
    pub value: &'a VariableValue,
}

/// Format function
pub type FormatFn = Arc<dyn Fn(&FormatInput<'_>) -> String + Send + Sync>;

/// Mapping from format name to format function
#[derive(Clone)]
pub struct FormatRegistry {
    formats: HashMap<String, FormatFn>,
}

impl FormatRegistry {
    /// Create registry with only `csv`
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            formats: HashMap::new(),
        };
        registry.register(DEFAULT_FORMAT, csv);
        registry
    }

    /// Create registry with the built-in formats
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("pipe", |i: &FormatInput<'_>| i.value.values().join("|"));
        registry.register("raw", csv);
        registry.register("text", csv);
        registry.register("glob", glob);
        registry.register("regex", regex_format);
        registry.register("json", json);
        registry.register("singlequote", |i: &FormatInput<'_>| {
            quote_each(i.value, |v| format!("'{}'", v.replace('\'', "\\'")))
        });
        registry.register("doublequote", |i: &FormatInput<'_>| {
            quote_each(i.value, |v| format!("\"{}\"", v.replace('"', "\\\"")))
        });
        registry.register("sqlstring", |i: &FormatInput<'_>| {
            quote_each(i.value, |v| format!("'{}'", v.replace('\'', "''")))
        });
        registry.register("lucene", lucene);
        registry.register("percentencode", |i: &FormatInput<'_>| {
            quote_each(i.value, percent_encode)
        });
        registry.register("queryparam", |i: &FormatInput<'_>| {
            i.value
                .values()
                .iter()
                .map(|v| format!("var-{}={}", percent_encode(i.name), percent_encode(v)))
                .collect::<Vec<_>>()
                .join("&")
        });
        registry
    }

    /// Register or replace a format
    pub fn register<F>(&mut self, name: impl Into<String>, format: F)
    where
        F: Fn(&FormatInput<'_>) -> String + Send + Sync + 'static,
    {
        self.formats.insert(name.into(), Arc::new(format));
    }

    /// Check if format exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }

    /// Registered format names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.formats.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered formats
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Check if registry is empty (never true: `csv` is always present)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Render `value` with `format`, falling back to `csv`
    #[must_use]
    pub fn apply(&self, format: Option<&str>, name: &str, value: &VariableValue) -> String {
        let input = FormatInput { name, value };
        let chosen = format.and_then(|f| {
            let found = self.formats.get(f);
            if found.is_none() {
                tracing::debug!(format = f, variable = name, "unknown format, using csv");
            }
            found
        });
        match chosen.or_else(|| self.formats.get(DEFAULT_FORMAT)) {
            Some(f) => f(&input),
            None => csv(&input),
        }
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.names())
            .finish()
    }
}

fn csv(input: &FormatInput<'_>) -> String {
    input.value.values().join(",")
}

fn quote_each(value: &VariableValue, quote: impl Fn(&str) -> String) -> String {
    value.values().into_iter().map(quote).collect::<Vec<_>>().join(",")
}

fn glob(input: &FormatInput<'_>) -> String {
    let values = input.value.values();
    if values.len() > 1 {
        format!("{{{}}}", values.join(","))
    } else {
        values.join("")
    }
}

fn regex_format(input: &FormatInput<'_>) -> String {
    let escaped: Vec<String> = input.value.values().into_iter().map(regex::escape).collect();
    if escaped.len() > 1 {
        format!("({})", escaped.join("|"))
    } else {
        escaped.join("")
    }
}

fn json(input: &FormatInput<'_>) -> String {
    let value = match input.value {
        VariableValue::Single(v) => serde_json::Value::String(v.clone()),
        VariableValue::Multi(vs) => vs.iter().cloned().map(serde_json::Value::String).collect(),
    };
    value.to_string()
}

fn lucene(input: &FormatInput<'_>) -> String {
    match input.value {
        VariableValue::Multi(vs) if vs.len() > 1 => {
            let quoted: Vec<String> = vs
                .iter()
                .map(|v| format!("\"{}\"", lucene_escape(v)))
                .collect();
            format!("({})", quoted.join(" OR "))
        }
        _ => input.value.values().into_iter().map(lucene_escape).collect(),
    }
}

fn lucene_escape(value: &str) -> String {
    const SPECIAL: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/',
    ];
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn percent_encode(value: &str) -> String {
    // form encoding turns spaces into '+'; a literal '+' is already %2B
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

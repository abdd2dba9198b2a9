//! Variable bindings and values

use crate::error::VariableError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value that selects every option of an include-all variable
pub const ALL_VALUE: &str = "$__all";

/// Current value of a variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    /// One value
    Single(String),
    /// Ordered selection of values
    Multi(Vec<String>),
}

impl VariableValue {
    /// All values, in order
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(v) => vec![v.as_str()],
            Self::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    /// Check if this is a multi-value selection
    #[inline]
    #[must_use]
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    /// Check if this selects "All"
    #[must_use]
    pub fn is_all(&self) -> bool {
        match self {
            Self::Single(v) => v == ALL_VALUE,
            Self::Multi(vs) => vs.iter().any(|v| v == ALL_VALUE),
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.values().join(","))
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for VariableValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<&str>> for VariableValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Multi(values.into_iter().map(str::to_string).collect())
    }
}

/// Kind of variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// Fixed option list, user-selectable
    #[default]
    Custom,
    /// Free text input
    Textbox,
    /// Fixed value, not user-updatable
    Constant,
}

/// A named variable defined on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableBinding {
    /// Name, unique within the defining node
    pub name: String,
    /// Current value
    pub value: VariableValue,
    /// Whether several values may be selected
    #[serde(default)]
    pub is_multi: bool,
    /// Whether `$__all` selects every option
    #[serde(default)]
    pub include_all: bool,
    /// Selectable options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Variable kind
    #[serde(default)]
    pub kind: VariableKind,
}

impl VariableBinding {
    /// Create a single-value custom variable
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            is_multi: value.is_multi(),
            value,
            include_all: false,
            options: Vec::new(),
            kind: VariableKind::Custom,
        }
    }

    /// Create a constant variable
    #[must_use]
    pub fn constant(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, value.into()).with_kind(VariableKind::Constant)
    }

    /// Create a text box variable
    #[must_use]
    pub fn textbox(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, value.into()).with_kind(VariableKind::Textbox)
    }

    /// Allow multiple values
    #[inline]
    #[must_use]
    pub fn with_multi(mut self) -> Self {
        self.is_multi = true;
        self
    }

    /// Allow `$__all`
    #[inline]
    #[must_use]
    pub fn with_include_all(mut self) -> Self {
        self.include_all = true;
        self
    }

    /// Set options
    #[must_use]
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Set kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: VariableKind) -> Self {
        self.kind = kind;
        self
    }

    /// Value used for interpolation: `$__all` expands to every option
    #[must_use]
    pub fn effective_value(&self) -> VariableValue {
        if self.include_all && self.value.is_all() {
            return VariableValue::Multi(self.options.clone());
        }
        self.value.clone()
    }

    /// Validate the binding itself
    ///
    /// # Errors
    /// - `VariableError::InvalidValue` for an empty or malformed name
    /// - `VariableError::NotMulti` for a multi value on a single-value binding
    pub fn validate(&self) -> Result<(), VariableError> {
        let valid_name = !self.name.is_empty()
            && self.name.chars().all(|c| c.is_alphanumeric() || c == '_');
        if !valid_name {
            return Err(VariableError::InvalidValue {
                name: self.name.clone(),
                reason: "names must be non-empty word characters".to_string(),
            });
        }
        self.check_value(&self.value)
    }

    /// Check that `value` may be assigned to this binding
    ///
    /// # Errors
    /// `VariableError::NotMulti` when several values are given to a
    /// single-value binding
    pub fn check_value(&self, value: &VariableValue) -> Result<(), VariableError> {
        match value {
            VariableValue::Multi(vs) if !self.is_multi && vs.len() > 1 => {
                Err(VariableError::NotMulti(self.name.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Normalize `value` to this binding's shape
    ///
    /// A one-element selection on a single-value binding becomes `Single`.
    #[must_use]
    pub fn normalize(&self, value: VariableValue) -> VariableValue {
        match value {
            VariableValue::Multi(mut vs) if !self.is_multi && vs.len() == 1 => {
                VariableValue::Single(vs.remove(0))
            }
            other => other,
        }
    }
}

//! Serialized dashboard model
//!
//! Only the fields the scene graph needs are typed; everything else is kept
//! in `extra` maps so that a loaded dashboard serializes back without loss.

use scene_core::RawTimeRange;
use scene_query::QueryDefinition;
use scene_variables::{VariableBinding, VariableKind, VariableValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A persisted dashboard
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardModel {
    /// Stable identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Dashboard time range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeModel>,
    /// Variable definitions
    #[serde(default)]
    pub templating: Templating,
    /// Top-level panels (rows carry nested panels)
    #[serde(default)]
    pub panels: Vec<PanelModel>,
    /// Fields the engine does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Persisted time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeModel {
    /// Start expression
    pub from: String,
    /// End expression
    pub to: String,
}

impl From<TimeModel> for RawTimeRange {
    fn from(time: TimeModel) -> Self {
        RawTimeRange::new(time.from, time.to)
    }
}

impl From<RawTimeRange> for TimeModel {
    fn from(range: RawTimeRange) -> Self {
        Self {
            from: range.from,
            to: range.to,
        }
    }
}

/// Variable section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Templating {
    /// Variables in definition order
    #[serde(default)]
    pub list: Vec<VariableModel>,
}

/// Persisted variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableModel {
    /// Variable name
    pub name: String,
    /// Variable type (`custom`, `constant`, `textbox`, ...)
    #[serde(rename = "type", default = "default_variable_type")]
    pub kind: String,
    /// Current selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentValue>,
    /// Selectable options
    #[serde(default)]
    pub options: Vec<OptionModel>,
    /// Type-specific query; for `custom` a comma-separated option list, for
    /// `constant`/`textbox` the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Multiple selection allowed
    #[serde(default)]
    pub multi: bool,
    /// "All" option offered
    #[serde(default)]
    pub include_all: bool,
    /// Fields the engine does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_variable_type() -> String {
    "custom".to_string()
}

/// Current selection of a variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentValue {
    /// Display text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<VariableValue>,
    /// Selected value(s)
    pub value: VariableValue,
}

/// One selectable option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionModel {
    /// Display text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Option value
    pub value: String,
    /// Selected flag
    #[serde(default)]
    pub selected: bool,
}

impl VariableModel {
    /// Engine kind for the persisted type; unknown types behave as `custom`
    #[must_use]
    pub fn variable_kind(&self) -> VariableKind {
        match self.kind.as_str() {
            "constant" => VariableKind::Constant,
            "textbox" => VariableKind::Textbox,
            _ => VariableKind::Custom,
        }
    }

    /// Option values: the explicit list, else the comma-separated custom query
    #[must_use]
    pub fn option_values(&self) -> Vec<String> {
        if !self.options.is_empty() {
            return self.options.iter().map(|o| o.value.clone()).collect();
        }
        match (self.variable_kind(), &self.query) {
            (VariableKind::Custom, Some(query)) => query
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Binding for this variable
    ///
    /// The initial value is `current`, else the query of a constant or
    /// textbox, else the first option, else empty.
    #[must_use]
    pub fn to_binding(&self) -> VariableBinding {
        let kind = self.variable_kind();
        let options = self.option_values();
        let value = match (&self.current, kind, &self.query) {
            (Some(current), _, _) => current.value.clone(),
            (None, VariableKind::Constant | VariableKind::Textbox, Some(query)) => {
                VariableValue::Single(query.clone())
            }
            _ => VariableValue::Single(options.first().cloned().unwrap_or_default()),
        };

        let mut binding = VariableBinding::new(self.name.clone(), value)
            .with_kind(kind)
            .with_options(options);
        binding.is_multi = self.multi;
        binding.include_all = self.include_all;
        binding.value = binding.normalize(binding.value.clone());
        binding
    }

    /// Write `binding`'s value back as the current selection
    pub fn apply_binding(&mut self, binding: &VariableBinding) {
        self.current = Some(CurrentValue {
            text: Some(binding.value.clone()),
            value: binding.value.clone(),
        });
        let selected = binding.value.values();
        for option in &mut self.options {
            option.selected = selected.contains(&option.value.as_str());
        }
        if binding.kind != VariableKind::Custom {
            self.query = Some(binding.value.to_string());
        }
    }
}

/// Persisted panel (or row)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelModel {
    /// Panel id, unique within the dashboard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Panel type; `row` panels group their nested `panels`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Queries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<QueryDefinition>,
    /// Nested panels of a row
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub panels: Vec<PanelModel>,
    /// Relative time override such as `6h`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_from: Option<String>,
    /// Variables fixed for this panel (repeated panels)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scoped_vars: BTreeMap<String, ScopedVar>,
    /// Fields the engine does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PanelModel {
    /// Check if this is a row
    #[must_use]
    pub fn is_row(&self) -> bool {
        self.kind.as_deref() == Some("row")
    }

    /// Time range implied by `timeFrom`
    #[must_use]
    pub fn time_override(&self) -> Option<RawTimeRange> {
        let from = self.time_from.as_deref()?.trim();
        if from.is_empty() {
            return None;
        }
        let from = if from.starts_with("now") {
            from.to_string()
        } else {
            format!("now-{from}")
        };
        Some(RawTimeRange::new(from, "now"))
    }
}

/// Persisted panel-scoped variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedVar {
    /// Display text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<VariableValue>,
    /// Value
    pub value: VariableValue,
}

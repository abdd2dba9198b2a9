//! Query definitions, requests and results

use crate::error::FetchError;
use scene_core::{NodeId, TimeRange};
use scene_variables::{referenced_variables, VariableValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Monotonic per-scheduler request number
pub type RequestId = u64;

/// A query target as stored in a dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    /// Query identifier within its panel (`A`, `B`, ...)
    pub ref_id: String,
    /// Datasource name or uid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<Value>,
    /// Query expression
    #[serde(default)]
    pub expr: String,
    /// Datasource-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueryDefinition {
    /// Create definition with an expression
    pub fn new(ref_id: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            datasource: None,
            expr: expr.into(),
            extra: Map::new(),
        }
    }

    /// Set datasource
    #[inline]
    #[must_use]
    pub fn with_datasource(mut self, datasource: impl Into<Value>) -> Self {
        self.datasource = Some(datasource.into());
        self
    }

    /// Set a datasource-specific field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Check that a request can be built from this definition
    ///
    /// # Errors
    /// `FetchError::Malformed` for a blank `refId`, or when there is neither
    /// an expression nor any datasource-specific field
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.ref_id.trim().is_empty() {
            return Err(FetchError::malformed("query has no refId"));
        }
        if self.expr.trim().is_empty() && self.extra.is_empty() {
            return Err(FetchError::malformed(format!(
                "query {} has no expression",
                self.ref_id
            )));
        }
        Ok(())
    }

    /// Variables referenced by the expression and string fields
    #[must_use]
    pub fn referenced_variables(&self) -> Vec<String> {
        let mut names = referenced_variables(&self.expr);
        let mut strings = Vec::new();
        for value in self.extra.values() {
            collect_strings(value, &mut strings);
        }
        for text in strings {
            for name in referenced_variables(text) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Copy with `interpolate` applied to the expression and every string field
    #[must_use]
    pub fn interpolated<F>(&self, interpolate: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        Self {
            ref_id: self.ref_id.clone(),
            datasource: self.datasource.clone(),
            expr: interpolate(&self.expr),
            extra: self
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), map_strings(v, &interpolate)))
                .collect(),
        }
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn map_strings<F>(value: &Value, f: &F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), map_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// One data-fetch attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Request number, increasing per scheduler
    pub request_id: RequestId,
    /// Node the scheduler runs on
    pub node: NodeId,
    /// Definition with variables interpolated
    pub definition: QueryDefinition,
    /// Time range snapshot, if the node has a time-range scope
    pub time_range: Option<TimeRange>,
    /// Every variable visible from the node when the request was built
    pub variables: BTreeMap<String, VariableValue>,
}

/// Data returned by a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result payload, opaque to the scheduler
    pub data: Value,
}

impl QueryResult {
    /// Create result
    #[inline]
    pub fn new(data: impl Into<Value>) -> Self {
        Self { data: data.into() }
    }
}

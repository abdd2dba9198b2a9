//! Scope-chain variable resolution and interpolation

use crate::binding::VariableValue;
use crate::format::FormatRegistry;
use crate::set::VariableSet;
use crate::template::{parse_template, TemplateSegment};
use chrono::{DateTime, Utc};
use scene_core::{SceneNode, TimeRangeScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Built-in variable: start of the nearest time range, epoch ms
pub const FROM_VARIABLE: &str = "__from";
/// Built-in variable: end of the nearest time range, epoch ms
pub const TO_VARIABLE: &str = "__to";

/// Resolver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Provide `__from`/`__to` when no binding shadows them
    pub builtin_time_variables: bool,
    /// Log unresolved markers at warn level
    pub warn_on_unresolved: bool,
    /// Fixed "now" for relative time ranges (wall clock when unset)
    #[serde(skip)]
    pub now: Option<DateTime<Utc>>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            builtin_time_variables: true,
            warn_on_unresolved: true,
            now: None,
        }
    }
}

impl ResolverConfig {
    /// Enable or disable `__from`/`__to`
    #[inline]
    #[must_use]
    pub fn with_builtin_time_variables(mut self, enabled: bool) -> Self {
        self.builtin_time_variables = enabled;
        self
    }

    /// Enable or disable unresolved-marker warnings
    #[inline]
    #[must_use]
    pub fn with_warn_on_unresolved(mut self, enabled: bool) -> Self {
        self.warn_on_unresolved = enabled;
        self
    }

    /// Pin "now"
    #[inline]
    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

/// A binding together with the node that defines it
#[derive(Debug, Clone)]
pub struct ScopedBinding {
    /// Defining node
    pub scope: Arc<SceneNode>,
    /// The binding
    pub binding: crate::binding::VariableBinding,
}

/// Resolves variable names along a node's ancestor chain
#[derive(Debug, Clone)]
pub struct VariableScopeResolver {
    formats: Arc<FormatRegistry>,
    config: ResolverConfig,
}

impl VariableScopeResolver {
    /// Create resolver over an injected format registry
    #[must_use]
    pub fn new(formats: Arc<FormatRegistry>) -> Self {
        Self {
            formats,
            config: ResolverConfig::default(),
        }
    }

    /// Set configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Format registry in use
    #[inline]
    #[must_use]
    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Nearest binding named `name`: on `node` itself, else the closest ancestor
    #[must_use]
    pub fn resolve_binding(&self, node: &SceneNode, name: &str) -> Option<ScopedBinding> {
        let scope = node.find_in_scope(|n| VariableSet::of(n).is_some_and(|set| set.contains(name)))?;
        let binding = VariableSet::get(&scope, name)?;
        Some(ScopedBinding { scope, binding })
    }

    /// Value of `name` as seen from `node`
    ///
    /// Returns `None` when no node on the scope chain defines it and it is not
    /// a built-in.
    #[must_use]
    pub fn resolve(&self, node: &SceneNode, name: &str) -> Option<VariableValue> {
        if let Some(scoped) = self.resolve_binding(node, name) {
            return Some(scoped.binding.effective_value());
        }
        self.resolve_builtin(node, name)
    }

    fn resolve_builtin(&self, node: &SceneNode, name: &str) -> Option<VariableValue> {
        if !self.config.builtin_time_variables || (name != FROM_VARIABLE && name != TO_VARIABLE) {
            return None;
        }
        let scope = TimeRangeScope::nearest(node)?;
        let raw = TimeRangeScope::read(&scope)?;
        let range = match raw.resolve(self.config.now.unwrap_or_else(Utc::now)) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(node = %node.id(), error = %e, "cannot resolve time range");
                return None;
            }
        };
        let ms = if name == FROM_VARIABLE { range.from_ms() } else { range.to_ms() };
        Some(VariableValue::Single(ms.to_string()))
    }

    /// Every user variable visible from `node`, nearer scopes shadowing outer ones
    #[must_use]
    pub fn resolve_all(&self, node: &SceneNode) -> BTreeMap<String, VariableValue> {
        let mut values = BTreeMap::new();
        for scope in node.ancestry() {
            for binding in VariableSet::bindings(&scope) {
                values.insert(binding.name.clone(), binding.effective_value());
            }
        }
        values
    }

    /// Replace variable markers in `template` with their values
    ///
    /// Unresolved markers are kept verbatim. A template without markers is
    /// returned unchanged.
    #[must_use]
    pub fn interpolate(&self, node: &SceneNode, template: &str) -> String {
        self.interpolate_with_format(node, template, None)
    }

    /// Like [`interpolate`](Self::interpolate), with a format for markers
    /// that carry no qualifier
    #[must_use]
    pub fn interpolate_with_format(
        &self,
        node: &SceneNode,
        template: &str,
        default_format: Option<&str>,
    ) -> String {
        let mut out = String::with_capacity(template.len());
        for segment in parse_template(template) {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(&text),
                TemplateSegment::Variable(var) => match self.resolve(node, &var.name) {
                    Some(value) => {
                        let format = var.format.as_deref().or(default_format);
                        out.push_str(&self.formats.apply(format, &var.name, &value));
                    }
                    None => {
                        if self.config.warn_on_unresolved {
                            tracing::warn!(node = %node.id(), variable = %var.name, marker = %var.raw, "unresolved variable");
                        }
                        out.push_str(&var.raw);
                    }
                },
            }
        }
        out
    }
}

impl Default for VariableScopeResolver {
    fn default() -> Self {
        Self::new(Arc::new(FormatRegistry::with_defaults()))
    }
}

//! Variable sets: the bindings a node defines
//!
//! The binding itself is stored in the defining node's state under
//! `var.<name>`, so an update goes through that node's `set_state` and
//! notifies its subscribers like any other change. The [`VariableSet`]
//! extension only remembers which names the node defines, in definition order.

use crate::binding::{VariableBinding, VariableValue};
use crate::error::VariableError;
use parking_lot::RwLock;
use scene_core::{SceneNode, StatePatch};
use std::sync::Arc;

/// State key prefix for variable bindings
pub const VARIABLE_KEY_PREFIX: &str = "var.";

/// State key holding the binding named `name`
#[inline]
#[must_use]
pub fn state_key(name: &str) -> String {
    format!("{VARIABLE_KEY_PREFIX}{name}")
}

/// Names of the variables a node defines
#[derive(Debug, Default)]
pub struct VariableSet {
    names: RwLock<Vec<String>>,
}

impl VariableSet {
    /// Variable set of `node`, if it defines any variables
    #[must_use]
    pub fn of(node: &SceneNode) -> Option<Arc<VariableSet>> {
        node.extension::<VariableSet>()
    }

    /// Define a new binding on `node`
    ///
    /// # Errors
    /// - `VariableError::DuplicateName` if `node` already defines the name
    /// - `VariableError::InvalidValue`/`NotMulti` if the binding is invalid
    pub fn define(node: &SceneNode, binding: VariableBinding) -> Result<(), VariableError> {
        binding.validate()?;

        let set = Self::of(node).unwrap_or_else(|| {
            let set = Arc::new(VariableSet::default());
            node.insert_extension(Arc::clone(&set));
            set
        });

        {
            let mut names = set.names.write();
            if names.contains(&binding.name) {
                return Err(VariableError::DuplicateName(binding.name));
            }
            names.push(binding.name.clone());
        }

        tracing::debug!(node = %node.id(), variable = %binding.name, "variable defined");
        node.set_state(StatePatch::new().set(state_key(&binding.name), to_json(&binding)));
        Ok(())
    }

    /// Update the value of a binding defined on `node`
    ///
    /// Returns the updated binding.
    ///
    /// # Errors
    /// - `VariableError::UnknownVariable` if `node` does not define `name`
    /// - `VariableError::ReadOnly` for constants
    /// - `VariableError::NotMulti` for several values on a single-value binding
    pub fn update(
        node: &SceneNode,
        name: &str,
        value: impl Into<VariableValue>,
    ) -> Result<VariableBinding, VariableError> {
        let mut binding =
            Self::get(node, name).ok_or_else(|| VariableError::UnknownVariable(name.to_string()))?;

        if binding.kind == crate::binding::VariableKind::Constant {
            return Err(VariableError::ReadOnly(name.to_string()));
        }

        let value = value.into();
        binding.check_value(&value)?;
        binding.value = binding.normalize(value);

        tracing::debug!(node = %node.id(), variable = %name, value = %binding.value, "variable updated");
        node.set_state(StatePatch::new().set(state_key(name), to_json(&binding)));
        Ok(binding)
    }

    /// Binding named `name` defined on `node` itself (no scope walk)
    #[must_use]
    pub fn get(node: &SceneNode, name: &str) -> Option<VariableBinding> {
        let state = node.state();
        let raw = state.get(&state_key(name))?;
        match serde_json::from_value(serde_json::Value::clone(raw)) {
            Ok(binding) => Some(binding),
            Err(e) => {
                tracing::warn!(node = %node.id(), variable = %name, error = %e, "malformed binding in state");
                None
            }
        }
    }

    /// All bindings defined on `node`, in definition order
    #[must_use]
    pub fn bindings(node: &SceneNode) -> Vec<VariableBinding> {
        Self::of(node)
            .map(|set| set.names())
            .unwrap_or_default()
            .iter()
            .filter_map(|name| Self::get(node, name))
            .collect()
    }

    /// Defined names, in definition order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.names.read().clone()
    }

    /// Check if `name` is defined
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.read().iter().any(|n| n == name)
    }
}

fn to_json(binding: &VariableBinding) -> serde_json::Value {
    // Serializing a plain struct of strings cannot fail
    serde_json::to_value(binding).unwrap_or(serde_json::Value::Null)
}

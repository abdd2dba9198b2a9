//! Scene Variables - scoped template variables
//!
//! Variables are defined on scene nodes and looked up along the ancestor
//! chain: a panel sees its own bindings first, then its row's, then the
//! dashboard's.
//!
//! ```rust
//! use scene_core::SceneNode;
//! use scene_variables::{VariableBinding, VariableScopeResolver, VariableSet};
//!
//! let dashboard = SceneNode::new("dashboard");
//! VariableSet::define(&dashboard, VariableBinding::new("region", "us-east")).unwrap();
//! let panel = SceneNode::new("panel");
//! panel.attach(&dashboard).unwrap();
//!
//! let resolver = VariableScopeResolver::default();
//! assert_eq!(resolver.interpolate(&panel, "region=${region}"), "region=us-east");
//! ```

pub mod binding;
pub mod error;
pub mod format;
pub mod resolver;
pub mod set;
pub mod template;

// Re-exports
pub use binding::{VariableBinding, VariableKind, VariableValue, ALL_VALUE};
pub use error::VariableError;
pub use format::{FormatFn, FormatInput, FormatRegistry, DEFAULT_FORMAT};
pub use resolver::{ResolverConfig, ScopedBinding, VariableScopeResolver, FROM_VARIABLE, TO_VARIABLE};
pub use set::{state_key, VariableSet, VARIABLE_KEY_PREFIX};
pub use template::{contains_markers, parse_template, referenced_variables, TemplateSegment, VariableRef};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for defining and resolving variables
    pub use crate::{
        FormatRegistry, VariableBinding, VariableError, VariableScopeResolver, VariableSet,
        VariableValue,
    };
}

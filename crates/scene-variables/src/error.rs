//! Variable errors
//!
//! Note that an unresolved reference inside a template is *not* an error:
//! interpolation passes the marker through unchanged.

/// Errors from defining or updating variable bindings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableError {
    /// Name already defined on this node
    #[error("variable {0:?} is already defined on this node")]
    DuplicateName(String),

    /// Name not defined on this node
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),

    /// Multiple values given to a single-value variable
    #[error("variable {0:?} does not accept multiple values")]
    NotMulti(String),

    /// Constant variables cannot be updated
    #[error("variable {0:?} is read-only")]
    ReadOnly(String),

    /// Invalid name or value
    #[error("invalid variable {name:?}: {reason}")]
    InvalidValue {
        /// Variable name
        name: String,
        /// What is wrong with it
        reason: String,
    },
}

impl VariableError {
    /// Variable name the error refers to
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::DuplicateName(n) | Self::UnknownVariable(n) | Self::NotMulti(n) | Self::ReadOnly(n) => n,
            Self::InvalidValue { name, .. } => name,
        }
    }
}

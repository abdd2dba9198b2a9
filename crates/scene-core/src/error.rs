//! Error types for the scene core
//!
//! Every variant here is a programmer-misuse error: it signals a bug in how
//! the tree was built or driven, not a runtime condition. Callers should
//! surface these immediately rather than retry.

use crate::types::NodeId;

/// Main scene error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// Node already has a parent
    #[error("node {node} is already attached to {parent}")]
    AlreadyAttached {
        /// The node being attached
        node: NodeId,
        /// Its current parent
        parent: NodeId,
    },

    /// Node is already active
    #[error("node {0} is already active")]
    AlreadyActive(NodeId),

    /// One or more activation handlers failed
    #[error("activation of node {node} failed: {}", failures.join("; "))]
    ActivationFailed {
        /// The node whose activation failed
        node: NodeId,
        /// One message per failing handler, in registration order
        failures: Vec<String>,
    },

    /// Attaching would make a node its own ancestor
    #[error("attaching {node} under {parent} would create a cycle")]
    WouldCreateCycle {
        /// The node being attached
        node: NodeId,
        /// The requested parent
        parent: NodeId,
    },

    /// A weakly referenced node was dropped while still in use
    #[error("node {0} has been dropped")]
    NodeDropped(NodeId),
}

impl SceneError {
    /// Lifecycle and attachment errors are construction bugs
    #[inline]
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyAttached { .. } | Self::AlreadyActive(_) | Self::WouldCreateCycle { .. }
        )
    }

    /// Node the error refers to
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::AlreadyAttached { node, .. }
            | Self::ActivationFailed { node, .. }
            | Self::WouldCreateCycle { node, .. } => *node,
            Self::AlreadyActive(node) | Self::NodeDropped(node) => *node,
        }
    }
}

/// Error returned by an activation handler
///
/// Handlers report failure with a message; the lifecycle aggregates them
/// into [`SceneError::ActivationFailed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Create handler error from any message
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<SceneError> for HandlerError {
    fn from(value: SceneError) -> Self {
        Self(value.to_string())
    }
}

//! Dashboard errors

use scene_core::{SceneError, TimeRangeError};
use scene_variables::VariableError;

/// Errors from loading, configuring or driving a dashboard
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// Dashboard JSON could not be parsed
    #[error("invalid dashboard JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Engine configuration could not be parsed
    #[error("invalid engine config: {0}")]
    Config(#[from] toml::de::Error),

    /// Scene graph misuse
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Variable definition or update rejected
    #[error(transparent)]
    Variable(#[from] VariableError),

    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Time range or panel time override is invalid
    #[error("invalid time range: {0}")]
    InvalidTimeRange(#[from] TimeRangeError),

    /// No panel with this id
    #[error("unknown panel {0}")]
    UnknownPanel(u64),
}

impl DashboardError {
    /// Check if this indicates a bug in the caller rather than bad input
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::Scene(e) if e.is_programmer_error())
    }
}

/// Result type for dashboard operations
pub type Result<T> = std::result::Result<T, DashboardError>;

//! Scene Dashboard - dashboards as scene graphs
//!
//! Builds a scene tree from dashboard JSON, wires a query scheduler to every
//! panel target and exposes the controls a UI would drive: time range,
//! variables, refresh, and a snapshot back to JSON.

pub mod config;
pub mod dashboard;
pub mod dry_run;
pub mod error;
pub mod model;

// Re-exports
pub use config::{EngineConfig, LogConfig};
pub use dashboard::{Dashboard, PanelHandle};
pub use dry_run::DryRunFetcher;
pub use error::{DashboardError, Result};
pub use model::{
    CurrentValue, DashboardModel, OptionModel, PanelModel, ScopedVar, Templating, TimeModel,
    VariableModel,
};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{Dashboard, DashboardError, DashboardModel, DryRunFetcher, EngineConfig};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Engine configuration
//!
//! ```toml
//! default_time_from = "now-6h"
//! default_time_to = "now"
//!
//! [scheduler]
//! debounce_ms = 0
//! publish_loading = true
//!
//! [resolver]
//! builtin_time_variables = true
//! warn_on_unresolved = true
//!
//! [log]
//! filter = "info"
//! json = false
//! ```

use crate::error::Result;
use scene_core::RawTimeRange;
use scene_query::SchedulerConfig;
use scene_variables::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Logging settings for the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Dashboard engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Start of the time range used when a dashboard has none
    pub default_time_from: String,
    /// End of the time range used when a dashboard has none
    pub default_time_to: String,
    /// Query scheduling
    pub scheduler: SchedulerConfig,
    /// Variable resolution
    pub resolver: ResolverConfig,
    /// Logging
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let range = RawTimeRange::default();
        Self {
            default_time_from: range.from,
            default_time_to: range.to,
            scheduler: SchedulerConfig::default(),
            resolver: ResolverConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `DashboardError::Config` for invalid TOML or mistyped fields
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// - `DashboardError::Io` if the file cannot be read
    /// - `DashboardError::Config` if it is not a valid config
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// With scheduler configuration
    #[inline]
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// With resolver configuration
    #[inline]
    #[must_use]
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    /// With default time range
    #[inline]
    #[must_use]
    pub fn with_default_time_range(mut self, range: RawTimeRange) -> Self {
        self.default_time_from = range.from;
        self.default_time_to = range.to;
        self
    }

    /// Time range for dashboards that do not set one
    #[must_use]
    pub fn default_time_range(&self) -> RawTimeRange {
        RawTimeRange::new(self.default_time_from.clone(), self.default_time_to.clone())
    }
}

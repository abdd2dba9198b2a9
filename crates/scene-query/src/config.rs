//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Query scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between a trigger and the fetch, in milliseconds
    ///
    /// Zero means "after the current task yields once": triggers fired in the
    /// same synchronous burst still coalesce into one request.
    pub debounce_ms: u64,
    /// Publish `status = "loading"` when a fetch starts
    pub publish_loading: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 0,
            publish_loading: true,
        }
    }
}

impl SchedulerConfig {
    /// Set debounce window
    #[inline]
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable loading-status publication
    #[inline]
    #[must_use]
    pub fn with_publish_loading(mut self, enabled: bool) -> Self {
        self.publish_loading = enabled;
        self
    }

    /// Debounce window
    #[inline]
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

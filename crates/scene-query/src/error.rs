//! Fetch errors
//!
//! Fetch errors never escape the scheduler: they become the node's `error`
//! state and the scheduler's `FetchError` phase.

use serde::{Deserialize, Serialize};

/// Data/backend errors of one query request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FetchError {
    /// Backend or transport failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Query definition cannot be turned into a request
    #[error("malformed query: {0}")]
    Malformed(String),

    /// No async runtime to run the fetch on
    #[error("no tokio runtime available to run the query")]
    NoRuntime,

    /// Request was cancelled
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Create backend error
    #[inline]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create malformed-query error
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Check if the next trigger may succeed without changing the query
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::NoRuntime)
    }
}

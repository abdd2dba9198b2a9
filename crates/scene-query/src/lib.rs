//! Scene Query - data fetching for scene nodes
//!
//! A [`QueryScheduler`] turns dependency changes (time range, variables,
//! manual refresh) into at most one in-flight [`QueryRequest`] per node and
//! publishes the outcome as node state:
//!
//! | key | value |
//! |-----|-------|
//! | `status` | `loading`, `done` or `error` |
//! | `requestId` | request the status refers to |
//! | `data` | payload of the latest successful request |
//! | `error` | [`FetchError`] of the latest failed request |
//!
//! The fetch itself is delegated to an injected [`QueryFetcher`].

pub mod config;
pub mod error;
pub mod fetcher;
pub mod query;
pub mod scheduler;

// Re-exports
pub use config::SchedulerConfig;
pub use error::FetchError;
pub use fetcher::{fetcher_fn, FnFetcher, QueryFetcher};
pub use query::{QueryDefinition, QueryRequest, QueryResult, RequestId};
pub use scheduler::{
    QueryScheduler, SchedulerPhase, Watch, DATA_KEY, ERROR_KEY, REQUEST_ID_KEY, STATUS_KEY,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for scheduling queries
    pub use crate::{
        FetchError, QueryDefinition, QueryFetcher, QueryRequest, QueryResult, QueryScheduler,
        SchedulerConfig, SchedulerPhase,
    };
}

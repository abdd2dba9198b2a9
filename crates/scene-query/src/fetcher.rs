//! The fetch boundary
//!
//! The data-source layer supplies a [`QueryFetcher`]. The scheduler only
//! relies on its contract: given a request and a cancellation token, resolve
//! to a result or an error. Timeouts are the fetcher's business.

use crate::error::FetchError;
use crate::query::{QueryRequest, QueryResult};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes query requests against a data source
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    /// Run `request`; `cancel` is signalled when the request is superseded
    /// or its node deactivates
    async fn fetch(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResult, FetchError>;
}

/// [`QueryFetcher`] backed by an async closure
pub struct FnFetcher<F> {
    f: F,
}

impl<F> fmt::Debug for FnFetcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFetcher").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> QueryFetcher for FnFetcher<F>
where
    F: Fn(QueryRequest, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<QueryResult, FetchError>> + Send,
{
    async fn fetch(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResult, FetchError> {
        (self.f)(request, cancel).await
    }
}

/// Wrap an async closure as a shared fetcher
pub fn fetcher_fn<F, Fut>(f: F) -> Arc<dyn QueryFetcher>
where
    F: Fn(QueryRequest, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<QueryResult, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher { f })
}

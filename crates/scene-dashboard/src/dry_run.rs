//! Fetcher that answers with the request it was given

use async_trait::async_trait;
use scene_query::{FetchError, QueryFetcher, QueryRequest, QueryResult};
use tokio_util::sync::CancellationToken;

/// Resolves every query with its own interpolated request
///
/// Useful for checking what a dashboard would send without a data source.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunFetcher;

#[async_trait]
impl QueryFetcher for DryRunFetcher {
    async fn fetch(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResult, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let data = serde_json::to_value(&request).map_err(|e| FetchError::backend(e.to_string()))?;
        Ok(QueryResult::new(data))
    }
}

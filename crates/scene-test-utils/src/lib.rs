//! Testing utilities for the scene graph workspace
//!
//! Shared fetchers, tree fixtures and spy recorders.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scene_core::{Cleanup, RawTimeRange, SceneNode, TimeRangeScope};
use scene_query::{FetchError, QueryFetcher, QueryRequest, QueryResult, RequestId};
use scene_variables::{VariableBinding, VariableSet};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

// ---- fetchers ----------------------------------------------------------

/// A call observed by [`ManualFetcher`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: QueryRequest,
    pub cancel: CancellationToken,
}

/// Fetcher whose calls stay pending until the test resolves them
#[derive(Default)]
pub struct ManualFetcher {
    calls: Mutex<Vec<RecordedCall>>,
    responders: Mutex<HashMap<RequestId, oneshot::Sender<Result<QueryResult, FetchError>>>>,
}

impl ManualFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Complete the call for `request_id`; false if it was never made or
    /// its future is gone (cancelled and dropped)
    pub fn resolve(&self, request_id: RequestId, result: Result<QueryResult, FetchError>) -> bool {
        match self.responders.lock().remove(&request_id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn succeed(&self, request_id: RequestId, data: serde_json::Value) -> bool {
        self.resolve(request_id, Ok(QueryResult::new(data)))
    }

    pub fn fail(&self, request_id: RequestId, message: &str) -> bool {
        self.resolve(request_id, Err(FetchError::backend(message)))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        self.calls.lock().iter().map(|c| c.request.request_id).collect()
    }

    pub fn token(&self, request_id: RequestId) -> Option<CancellationToken> {
        self.calls
            .lock()
            .iter()
            .find(|c| c.request.request_id == request_id)
            .map(|c| c.cancel.clone())
    }

    pub fn last_request(&self) -> Option<QueryRequest> {
        self.calls.lock().last().map(|c| c.request.clone())
    }
}

#[async_trait]
impl QueryFetcher for ManualFetcher {
    async fn fetch(&self, request: QueryRequest, cancel: CancellationToken) -> Result<QueryResult, FetchError> {
        let (tx, rx) = oneshot::channel();
        self.responders.lock().insert(request.request_id, tx);
        self.calls.lock().push(RecordedCall { request, cancel });
        rx.await.unwrap_or(Err(FetchError::Cancelled))
    }
}

/// Fetcher that answers immediately with the interpolated query
#[derive(Debug, Default)]
pub struct EchoFetcher {
    calls: Mutex<Vec<QueryRequest>>,
}

impl EchoFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<QueryRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl QueryFetcher for EchoFetcher {
    async fn fetch(&self, request: QueryRequest, _cancel: CancellationToken) -> Result<QueryResult, FetchError> {
        let data = json!({
            "refId": request.definition.ref_id,
            "expr": request.definition.expr,
            "requestId": request.request_id,
            "from": request.time_range.as_ref().map(|r| r.raw.from.clone()),
            "to": request.time_range.as_ref().map(|r| r.raw.to.clone()),
        });
        self.calls.lock().push(request);
        Ok(QueryResult::new(data))
    }
}

// ---- fixtures ----------------------------------------------------------

/// Dashboard root with a time range and no children
pub fn dashboard_node(from: &str, to: &str) -> Arc<SceneNode> {
    let root = SceneNode::new("dashboard");
    TimeRangeScope::install(&root, &RawTimeRange::new(from, to));
    root
}

/// Attach a new node of `kind` under `parent`
pub fn child(parent: &Arc<SceneNode>, kind: &str) -> Arc<SceneNode> {
    let node = SceneNode::new(kind);
    node.attach(parent).unwrap();
    node
}

/// Define a variable on `node`
pub fn define(node: &SceneNode, binding: VariableBinding) {
    VariableSet::define(node, binding).unwrap();
}

/// Let spawned tasks run; time must be paused
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ---- spies -------------------------------------------------------------

/// Ordered log of events shared between callbacks
#[derive(Debug, Clone, Default)]
pub struct SpyLog(Arc<Mutex<Vec<String>>>);

impl SpyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Activation handler logging `on <label>` and a cleanup logging `off <label>`
    pub fn track_activation(&self, node: &SceneNode, label: &str) {
        let log = self.clone();
        let label = label.to_string();
        node.add_activation_handler(move |_| {
            log.push(format!("on {label}"));
            let log = log.clone();
            let label = label.clone();
            Ok(Some(Box::new(move || log.push(format!("off {label}"))) as Cleanup))
        });
    }
}

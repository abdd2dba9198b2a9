//! Query scheduler
//!
//! A [`QueryScheduler`] is hung on a scene node. While the node is active it
//! issues one fetch per logical change of the state it watches:
//!
//! ```text
//!            trigger                 debounce elapsed
//!   Idle ───────────────▶ FetchPending ───────────────▶ FetchInFlight
//!    ▲                        ▲  │ malformed                 │    │
//!    │                        │  ▼                           │    │
//!    │                trigger │ FetchError ◀─────────────────┼────┘ fetch failed
//!    │                        └──────────┘                   │
//!    └───────────────────────────────────────────────────────┘ matching result
//! ```
//!
//! Triggers that arrive while a request is pending coalesce into it. A newer
//! request cancels the token of the one in flight before its own fetch
//! starts, and only the result of the latest request is ever published.
//! Deactivation cancels everything and returns to `Idle` without touching
//! state.

use crate::config::SchedulerConfig;
use crate::error::FetchError;
use crate::fetcher::QueryFetcher;
use crate::query::{QueryDefinition, QueryRequest, QueryResult, RequestId};
use chrono::Utc;
use parking_lot::Mutex;
use scene_core::{
    Cleanup, DependencyTracker, NodeId, SceneNode, StatePatch, TimeRangeScope,
};
use scene_variables::{state_key, VariableScopeResolver};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// State key of the latest result payload
pub const DATA_KEY: &str = "data";
/// State key of the latest error
pub const ERROR_KEY: &str = "error";
/// State key of the request status (`loading`, `done`, `error`)
pub const STATUS_KEY: &str = "status";
/// State key of the request id the status refers to
pub const REQUEST_ID_KEY: &str = "requestId";

/// Scheduler phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerPhase {
    /// Nothing to do
    Idle,
    /// A request id is reserved; the fetch starts once the debounce elapses
    FetchPending,
    /// The latest request is running
    FetchInFlight,
    /// The latest request failed
    FetchError,
}

impl SchedulerPhase {
    /// Check if no request is pending or in flight
    #[inline]
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::FetchError)
    }
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::FetchPending => "fetch_pending",
            Self::FetchInFlight => "fetch_in_flight",
            Self::FetchError => "fetch_error",
        };
        f.write_str(s)
    }
}

/// Something the scheduler reacts to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Watch {
    /// `from`/`to` of the nearest time-range scope
    TimeRange,
    /// The nearest binding of a variable
    Variable(String),
}

struct InFlight {
    request_id: RequestId,
    cancel: CancellationToken,
}

struct Inner {
    phase: SchedulerPhase,
    active: bool,
    /// Bumped on deactivation; debounce tasks of an older generation do nothing
    generation: u64,
    last_request_id: RequestId,
    pending: Option<RequestId>,
    in_flight: Option<InFlight>,
    last_request: Option<QueryRequest>,
    result: Option<QueryResult>,
    error: Option<FetchError>,
}

/// Per-node query state machine
pub struct QueryScheduler {
    definition: QueryDefinition,
    fetcher: Arc<dyn QueryFetcher>,
    resolver: Arc<VariableScopeResolver>,
    config: SchedulerConfig,
    watches: Vec<Watch>,
    node: Weak<SceneNode>,
    node_id: Option<NodeId>,
    inner: Mutex<Inner>,
    phase_tx: watch::Sender<SchedulerPhase>,
}

impl QueryScheduler {
    /// Create a scheduler for `definition`; see [`install`](Self::install)
    pub fn new(definition: QueryDefinition, fetcher: Arc<dyn QueryFetcher>) -> Self {
        Self {
            definition,
            fetcher,
            resolver: Arc::new(VariableScopeResolver::default()),
            config: SchedulerConfig::default(),
            watches: Vec::new(),
            node: Weak::new(),
            node_id: None,
            inner: Mutex::new(Inner {
                phase: SchedulerPhase::Idle,
                active: false,
                generation: 0,
                last_request_id: 0,
                pending: None,
                in_flight: None,
                last_request: None,
                result: None,
                error: None,
            }),
            phase_tx: watch::channel(SchedulerPhase::Idle).0,
        }
    }

    /// Set the resolver used for interpolation and variable lookup
    #[inline]
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<VariableScopeResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// React to changes of the nearest time range
    #[must_use]
    pub fn watch_time_range(mut self) -> Self {
        if !self.watches.contains(&Watch::TimeRange) {
            self.watches.push(Watch::TimeRange);
        }
        self
    }

    /// React to changes of the nearest bindings of `names`
    #[must_use]
    pub fn watch_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let watch = Watch::Variable(name.into());
            if !self.watches.contains(&watch) {
                self.watches.push(watch);
            }
        }
        self
    }

    /// Hang the scheduler on `node`
    ///
    /// Registers an activation handler: on activation the scheduler connects
    /// its watches and issues the first request; on deactivation it releases
    /// them and resets. A node carries at most one scheduler; installing a
    /// second one replaces the extension but not the first handler.
    pub fn install(mut self, node: &Arc<SceneNode>) -> Arc<Self> {
        self.node = Arc::downgrade(node);
        self.node_id = Some(node.id());
        let scheduler = Arc::new(self);
        node.insert_extension(Arc::clone(&scheduler));

        let weak = Arc::downgrade(&scheduler);
        node.add_activation_handler(move |node| match weak.upgrade() {
            Some(scheduler) => Ok(scheduler.on_activate(node)),
            None => Ok(None),
        });
        scheduler
    }

    /// Scheduler installed on `node`
    #[must_use]
    pub fn of(node: &SceneNode) -> Option<Arc<QueryScheduler>> {
        node.extension::<QueryScheduler>()
    }

    // ---- accessors ---------------------------------------------------

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SchedulerPhase {
        self.inner.lock().phase
    }

    /// Receiver that sees every phase change
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase_tx.subscribe()
    }

    /// Check if the owning node is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Id of the latest request (0 before the first)
    #[must_use]
    pub fn last_request_id(&self) -> RequestId {
        self.inner.lock().last_request_id
    }

    /// Latest request handed to the fetcher
    #[must_use]
    pub fn last_request(&self) -> Option<QueryRequest> {
        self.inner.lock().last_request.clone()
    }

    /// Latest successful result
    #[must_use]
    pub fn result(&self) -> Option<QueryResult> {
        self.inner.lock().result.clone()
    }

    /// Error of the latest request, if it failed
    #[must_use]
    pub fn error(&self) -> Option<FetchError> {
        self.inner.lock().error.clone()
    }

    /// Node the scheduler is installed on
    #[must_use]
    pub fn node(&self) -> Option<Arc<SceneNode>> {
        self.node.upgrade()
    }

    /// Query definition (uninterpolated)
    #[inline]
    #[must_use]
    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    /// Declared watches
    #[inline]
    #[must_use]
    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ---- triggers ----------------------------------------------------

    /// Issue a new request without any dependency change
    ///
    /// Ignored while the node is inactive.
    pub fn refresh(self: &Arc<Self>) {
        if !self.is_active() {
            tracing::debug!(node = ?self.node_id, "refresh ignored on inactive scheduler");
            return;
        }
        self.trigger("refresh");
    }

    fn on_activate(self: &Arc<Self>, node: &SceneNode) -> Option<Cleanup> {
        let mut tracker = DependencyTracker::new(node.id());
        for watch in &self.watches {
            match watch {
                Watch::TimeRange => match TimeRangeScope::nearest(node) {
                    Some(scope) => tracker = tracker.watch(&scope, TimeRangeScope::keys()),
                    None => tracing::debug!(node = %node.id(), "no time range in scope"),
                },
                Watch::Variable(name) => match self.resolver.resolve_binding(node, name) {
                    Some(scoped) => tracker = tracker.watch(&scoped.scope, [state_key(name)]),
                    None => tracing::debug!(node = %node.id(), variable = %name, "watched variable not in scope"),
                },
            }
        }

        let weak = Arc::downgrade(self);
        let binding = tracker.connect(move |publisher, _| {
            if let Some(scheduler) = weak.upgrade() {
                tracing::trace!(%publisher, "watched dependency changed");
                scheduler.trigger("dependency");
            }
        });
        node.insert_extension(Arc::new(tracker));

        self.inner.lock().active = true;
        self.trigger("activation");

        let weak = Arc::downgrade(self);
        Some(Box::new(move || {
            binding.release();
            if let Some(scheduler) = weak.upgrade() {
                scheduler.reset();
            }
        }) as Cleanup)
    }

    fn trigger(self: &Arc<Self>, reason: &'static str) {
        let (request_id, generation) = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            if inner.phase == SchedulerPhase::FetchPending {
                tracing::trace!(node = ?self.node_id, reason, "trigger coalesced into pending request");
                return;
            }
            inner.last_request_id += 1;
            self.enter(&mut inner, SchedulerPhase::FetchPending);
            inner.pending = Some(inner.last_request_id);
            (inner.last_request_id, inner.generation)
        };
        tracing::debug!(node = ?self.node_id, request_id, reason, "request pending");

        match Handle::try_current() {
            Ok(handle) => {
                let scheduler = Arc::clone(self);
                let debounce = self.config.debounce();
                handle.spawn(async move {
                    if debounce.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(debounce).await;
                    }
                    scheduler.launch(request_id, generation).await;
                });
            }
            Err(_) => self.fail(request_id, FetchError::NoRuntime),
        }
    }

    // ---- request execution -------------------------------------------

    fn enter(&self, inner: &mut Inner, phase: SchedulerPhase) {
        inner.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn is_current(inner: &Inner, request_id: RequestId, generation: u64) -> bool {
        inner.active && inner.generation == generation && inner.pending == Some(request_id)
    }

    async fn launch(self: Arc<Self>, request_id: RequestId, generation: u64) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let current = Self::is_current(&self.inner.lock(), request_id, generation);
        if !current {
            return;
        }

        let request = match self.build_request(&node, request_id) {
            Ok(request) => request,
            Err(e) => {
                let superseded = {
                    let mut inner = self.inner.lock();
                    if Self::is_current(&inner, request_id, generation) {
                        inner.in_flight.take()
                    } else {
                        None
                    }
                };
                if let Some(previous) = superseded {
                    tracing::debug!(node = %node.id(), superseded = previous.request_id, request_id, "cancelling superseded request");
                    previous.cancel.cancel();
                }
                self.fail(request_id, e);
                return;
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut inner = self.inner.lock();
            if !Self::is_current(&inner, request_id, generation) {
                return;
            }
            let next = InFlight {
                request_id,
                cancel: cancel.clone(),
            };
            if let Some(previous) = inner.in_flight.replace(next) {
                tracing::debug!(node = %node.id(), superseded = previous.request_id, request_id, "cancelling superseded request");
                previous.cancel.cancel();
            }
            inner.pending = None;
            self.enter(&mut inner, SchedulerPhase::FetchInFlight);
            inner.last_request = Some(request.clone());
        }

        tracing::debug!(node = %node.id(), request_id, ref_id = %request.definition.ref_id, "fetch started");
        if self.config.publish_loading {
            node.set_state(
                StatePatch::new()
                    .set(STATUS_KEY, "loading")
                    .set(REQUEST_ID_KEY, request_id),
            );
        }
        drop(node);

        let fetcher = Arc::clone(&self.fetcher);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::Cancelled),
            result = fetcher.fetch(request, cancel.clone()) => result,
        };
        self.complete(request_id, &cancel, outcome);
    }

    fn build_request(&self, node: &SceneNode, request_id: RequestId) -> Result<QueryRequest, FetchError> {
        self.definition.validate()?;

        let now = self.resolver.config().now.unwrap_or_else(Utc::now);
        let time_range = TimeRangeScope::nearest(node)
            .and_then(|scope| TimeRangeScope::read(&scope))
            .map(|raw| raw.resolve(now))
            .transpose()
            .map_err(|e| FetchError::malformed(format!("time range: {e}")))?;

        Ok(QueryRequest {
            request_id,
            node: node.id(),
            definition: self
                .definition
                .interpolated(|text| self.resolver.interpolate(node, text)),
            time_range,
            variables: self.resolver.resolve_all(node),
        })
    }

    fn complete(&self, request_id: RequestId, cancel: &CancellationToken, outcome: Result<QueryResult, FetchError>) {
        {
            let mut inner = self.inner.lock();
            let current = inner.active && !cancel.is_cancelled() && inner.last_request_id == request_id;
            if !current {
                tracing::debug!(node = ?self.node_id, request_id, latest = inner.last_request_id, "discarding stale result");
                return;
            }
            inner.in_flight = None;
            match &outcome {
                Ok(result) => {
                    self.enter(&mut inner, SchedulerPhase::Idle);
                    inner.result = Some(result.clone());
                    inner.error = None;
                }
                Err(e) => {
                    self.enter(&mut inner, SchedulerPhase::FetchError);
                    inner.error = Some(e.clone());
                }
            }
        }

        let Some(node) = self.node.upgrade() else {
            return;
        };
        match outcome {
            Ok(result) => {
                tracing::debug!(node = %node.id(), request_id, "fetch completed");
                node.set_state(
                    StatePatch::new()
                        .set(DATA_KEY, result.data)
                        .set(REQUEST_ID_KEY, request_id)
                        .set(STATUS_KEY, "done")
                        .remove(ERROR_KEY),
                );
            }
            Err(e) => self.publish_error(&node, request_id, &e),
        }
    }

    /// Move straight to `FetchError` without calling the fetcher
    fn fail(&self, request_id: RequestId, error: FetchError) {
        {
            let mut inner = self.inner.lock();
            if !inner.active || inner.last_request_id != request_id {
                return;
            }
            inner.pending = None;
            self.enter(&mut inner, SchedulerPhase::FetchError);
            inner.error = Some(error.clone());
        }
        if let Some(node) = self.node.upgrade() {
            self.publish_error(&node, request_id, &error);
        }
    }

    fn publish_error(&self, node: &SceneNode, request_id: RequestId, error: &FetchError) {
        tracing::warn!(node = %node.id(), request_id, ref_id = %self.definition.ref_id, error = %error, "query failed");
        let value = serde_json::to_value(error).unwrap_or_else(|_| error.to_string().into());
        node.set_state(
            StatePatch::new()
                .set(ERROR_KEY, value)
                .set(REQUEST_ID_KEY, request_id)
                .set(STATUS_KEY, "error"),
        );
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.active = false;
        inner.generation += 1;
        if let Some(in_flight) = inner.in_flight.take() {
            tracing::debug!(node = ?self.node_id, request_id = in_flight.request_id, "cancelling request on deactivation");
            in_flight.cancel.cancel();
        }
        inner.pending = None;
        self.enter(&mut inner, SchedulerPhase::Idle);
        drop(inner);

        if let Some(node) = self.node.upgrade() {
            node.remove_extension::<DependencyTracker>();
        }
    }
}

impl fmt::Debug for QueryScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("QueryScheduler")
            .field("node", &self.node_id)
            .field("ref_id", &self.definition.ref_id)
            .field("phase", &inner.phase)
            .field("last_request_id", &inner.last_request_id)
            .finish_non_exhaustive()
    }
}

//! Dashboard scene: tree construction and the control surface around it
//!
//! Tree shape:
//!
//! ```text
//! dashboard          time range, dashboard variables
//! ├── panel          optional time override, scoped variables
//! │   └── query      QueryScheduler per target
//! └── row
//!     └── panel
//!         └── query
//! ```

use crate::config::EngineConfig;
use crate::error::{DashboardError, Result};
use crate::model::{DashboardModel, PanelModel};
use chrono::Utc;
use scene_core::{RawTimeRange, SceneNode, StatePatch, TimeRangeScope};
use scene_query::{
    QueryFetcher, QueryScheduler, DATA_KEY, ERROR_KEY, REQUEST_ID_KEY, STATUS_KEY,
};
use scene_variables::{
    FormatRegistry, VariableBinding, VariableKind, VariableScopeResolver, VariableSet, VariableValue,
};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A panel of a built dashboard
#[derive(Debug, Clone)]
pub struct PanelHandle {
    /// Panel id from the model
    pub id: Option<u64>,
    /// Panel title
    pub title: String,
    /// Scene node of the panel
    pub node: Arc<SceneNode>,
    /// One scheduler per query target
    pub queries: Vec<Arc<QueryScheduler>>,
}

struct TreeBuilder<'a> {
    fetcher: Arc<dyn QueryFetcher>,
    resolver: Arc<VariableScopeResolver>,
    config: &'a EngineConfig,
    panels: Vec<PanelHandle>,
}

impl TreeBuilder<'_> {
    fn add_panel(&mut self, parent: &Arc<SceneNode>, panel: &PanelModel) -> Result<()> {
        let kind = if panel.is_row() { "row" } else { "panel" };
        let mut state = StatePatch::new().set("title", panel.title.clone());
        if let Some(id) = panel.id {
            state = state.set("id", id);
        }
        let node = SceneNode::new(kind);
        node.set_state(state);
        node.attach(parent)?;

        if let Some(range) = panel.time_override() {
            check_range(&range, &self.resolver)?;
            TimeRangeScope::install(&node, &range);
        }

        for (name, scoped) in &panel.scoped_vars {
            let binding = VariableBinding::new(name.clone(), scoped.value.clone())
                .with_kind(VariableKind::Constant);
            VariableSet::define(&node, binding)?;
        }

        let mut queries = Vec::with_capacity(panel.targets.len());
        for target in &panel.targets {
            let query = SceneNode::new("query");
            query.set_state(StatePatch::new().set("refId", target.ref_id.clone()));
            query.attach(&node)?;
            let scheduler = QueryScheduler::new(target.clone(), Arc::clone(&self.fetcher))
                .with_resolver(Arc::clone(&self.resolver))
                .with_config(self.config.scheduler.clone())
                .watch_time_range()
                .watch_variables(target.referenced_variables())
                .install(&query);
            queries.push(scheduler);
        }

        if !panel.is_row() {
            self.panels.push(PanelHandle {
                id: panel.id,
                title: panel.title.clone(),
                node: Arc::clone(&node),
                queries,
            });
        }

        for nested in &panel.panels {
            self.add_panel(&node, nested)?;
        }
        Ok(())
    }
}

fn check_range(range: &RawTimeRange, resolver: &VariableScopeResolver) -> Result<()> {
    range.resolve(resolver.config().now.unwrap_or_else(Utc::now))?;
    Ok(())
}

/// A dashboard loaded into a scene graph
pub struct Dashboard {
    model: DashboardModel,
    root: Arc<SceneNode>,
    resolver: Arc<VariableScopeResolver>,
    panels: Vec<PanelHandle>,
}

impl Dashboard {
    /// Build from a parsed model
    ///
    /// # Errors
    /// - `DashboardError::InvalidTimeRange` for a bad dashboard range or panel override
    /// - `DashboardError::Variable` for invalid or duplicate variables
    pub fn from_model(
        model: DashboardModel,
        fetcher: Arc<dyn QueryFetcher>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let resolver = Arc::new(
            VariableScopeResolver::new(Arc::new(FormatRegistry::with_defaults()))
                .with_config(config.resolver.clone()),
        );

        let root = SceneNode::new("dashboard");
        let mut state = StatePatch::new().set("title", model.title.clone());
        if let Some(uid) = &model.uid {
            state = state.set("uid", uid.clone());
        }
        root.set_state(state);

        let range = model
            .time
            .clone()
            .map_or_else(|| config.default_time_range(), RawTimeRange::from);
        check_range(&range, &resolver)?;
        TimeRangeScope::install(&root, &range);

        for variable in &model.templating.list {
            VariableSet::define(&root, variable.to_binding())?;
        }

        let mut builder = TreeBuilder {
            fetcher,
            resolver: Arc::clone(&resolver),
            config,
            panels: Vec::new(),
        };
        for panel in &model.panels {
            builder.add_panel(&root, panel)?;
        }

        tracing::debug!(
            title = %model.title,
            panels = builder.panels.len(),
            variables = model.templating.list.len(),
            "dashboard built"
        );
        Ok(Self {
            panels: builder.panels,
            model,
            root,
            resolver,
        })
    }

    /// Build from dashboard JSON
    ///
    /// # Errors
    /// `DashboardError::Parse` for invalid JSON, else as [`from_model`](Self::from_model)
    pub fn from_json(
        json: &str,
        fetcher: Arc<dyn QueryFetcher>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let model: DashboardModel = serde_json::from_str(json)?;
        Self::from_model(model, fetcher, config)
    }

    /// Build from a dashboard JSON file
    ///
    /// # Errors
    /// `DashboardError::Io` if the file cannot be read, else as [`from_json`](Self::from_json)
    pub fn from_path(
        path: impl AsRef<Path>,
        fetcher: Arc<dyn QueryFetcher>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text, fetcher, config)
    }

    // ---- structure ---------------------------------------------------

    /// Root node
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Arc<SceneNode> {
        &self.root
    }

    /// Title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.model.title
    }

    /// Model the dashboard was built from
    #[inline]
    #[must_use]
    pub fn model(&self) -> &DashboardModel {
        &self.model
    }

    /// Resolver shared by every scheduler of this dashboard
    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &Arc<VariableScopeResolver> {
        &self.resolver
    }

    /// Panels in tree order (rows excluded)
    #[inline]
    #[must_use]
    pub fn panels(&self) -> &[PanelHandle] {
        &self.panels
    }

    /// Panel by id
    #[must_use]
    pub fn panel(&self, id: u64) -> Option<&PanelHandle> {
        self.panels.iter().find(|p| p.id == Some(id))
    }

    /// Every query scheduler, in tree order
    #[must_use]
    pub fn schedulers(&self) -> Vec<Arc<QueryScheduler>> {
        self.panels
            .iter()
            .flat_map(|p| p.queries.iter().cloned())
            .collect()
    }

    // ---- lifecycle ---------------------------------------------------

    /// Activate the whole tree; every query issues its first request
    ///
    /// # Errors
    /// `DashboardError::Scene` if the tree is already active or a handler fails
    pub fn activate(&self) -> Result<()> {
        self.root.activate_subtree()?;
        tracing::info!(title = %self.model.title, queries = self.schedulers().len(), "dashboard activated");
        Ok(())
    }

    /// Deactivate the whole tree, cancelling in-flight queries
    pub fn deactivate(&self) {
        self.root.deactivate_subtree();
        tracing::info!(title = %self.model.title, "dashboard deactivated");
    }

    /// Check if active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.root.is_active()
    }

    /// Re-run every query
    pub fn refresh(&self) {
        tracing::debug!(title = %self.model.title, "refresh");
        for scheduler in self.schedulers() {
            scheduler.refresh();
        }
    }

    /// Check if no query is pending or in flight
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.schedulers().iter().all(|s| s.phase().is_settled())
    }

    /// Wait until [`is_settled`](Self::is_settled) or `timeout` elapses
    ///
    /// Returns whether the dashboard settled.
    pub async fn wait_settled(&self, timeout: Duration) -> bool {
        let mut phases: Vec<_> = self.schedulers().iter().map(|s| s.watch_phase()).collect();
        let settle = async {
            // a settled scheduler can be retriggered while we wait on another
            while !self.is_settled() {
                for phase in &mut phases {
                    if phase.wait_for(|p| p.is_settled()).await.is_err() {
                        return;
                    }
                }
            }
        };
        tokio::time::timeout(timeout, settle).await.is_ok()
    }

    // ---- controls ----------------------------------------------------

    /// Current dashboard time range
    #[must_use]
    pub fn time_range(&self) -> RawTimeRange {
        TimeRangeScope::read(&self.root).unwrap_or_default()
    }

    /// Change the dashboard time range
    ///
    /// # Errors
    /// `DashboardError::InvalidTimeRange` if the range does not resolve
    pub fn set_time_range(&self, range: &RawTimeRange) -> Result<()> {
        check_range(range, &self.resolver)?;
        tracing::debug!(from = %range.from, to = %range.to, "time range changed");
        TimeRangeScope::update(&self.root, range);
        Ok(())
    }

    /// Dashboard-level variable
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<VariableBinding> {
        VariableSet::get(&self.root, name)
    }

    /// Dashboard-level variables in definition order
    #[must_use]
    pub fn variables(&self) -> Vec<VariableBinding> {
        VariableSet::bindings(&self.root)
    }

    /// Change a dashboard-level variable
    ///
    /// # Errors
    /// `DashboardError::Variable` for unknown, read-only or single-value variables
    pub fn set_variable(&self, name: &str, value: impl Into<VariableValue>) -> Result<VariableBinding> {
        Ok(VariableSet::update(&self.root, name, value)?)
    }

    /// Interpolate `template` as seen from a panel, or from the dashboard
    ///
    /// # Errors
    /// `DashboardError::UnknownPanel` for a panel id that does not exist
    pub fn interpolate(&self, template: &str, panel: Option<u64>) -> Result<String> {
        let node = match panel {
            Some(id) => &self.panel(id).ok_or(DashboardError::UnknownPanel(id))?.node,
            None => &self.root,
        };
        Ok(self.resolver.interpolate(node, template))
    }

    // ---- output ------------------------------------------------------

    /// Model with the current time range and variable values written back
    #[must_use]
    pub fn snapshot(&self) -> DashboardModel {
        let mut model = self.model.clone();
        model.time = Some(self.time_range().into());
        for variable in &mut model.templating.list {
            if let Some(binding) = VariableSet::get(&self.root, &variable.name) {
                variable.apply_binding(&binding);
            }
        }
        model
    }

    /// [`snapshot`](Self::snapshot) as pretty JSON
    ///
    /// # Errors
    /// `DashboardError::Parse` if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Query state of every panel as JSON
    #[must_use]
    pub fn report(&self) -> Value {
        let panels: Vec<Value> = self
            .panels
            .iter()
            .map(|panel| {
                let queries: Vec<Value> = panel
                    .queries
                    .iter()
                    .map(|scheduler| {
                        let state = scheduler_state(scheduler);
                        json!({
                            "refId": scheduler.definition().ref_id,
                            "phase": scheduler.phase().to_string(),
                            "requestId": state.get(REQUEST_ID_KEY).cloned(),
                            "status": state.get(STATUS_KEY).cloned(),
                            "data": state.get(DATA_KEY).cloned(),
                            "error": state.get(ERROR_KEY).cloned(),
                        })
                    })
                    .collect();
                json!({"id": panel.id, "title": panel.title, "queries": queries})
            })
            .collect();
        json!({"title": self.model.title, "time": self.time_range(), "panels": panels})
    }
}

fn scheduler_state(scheduler: &QueryScheduler) -> Map<String, Value> {
    match scheduler.node() {
        Some(node) => match node.state().to_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        None => Map::new(),
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("title", &self.model.title)
            .field("panels", &self.panels.len())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

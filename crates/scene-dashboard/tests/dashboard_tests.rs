//! Dashboard loading, controls and query wiring

use pretty_assertions::assert_eq;
use scene_core::RawTimeRange;
use scene_dashboard::{Dashboard, DashboardError, DryRunFetcher, EngineConfig};
use scene_query::{QueryFetcher, SchedulerPhase, DATA_KEY, REQUEST_ID_KEY};
use scene_test_utils::{settle, EchoFetcher, ManualFetcher};
use scene_variables::{VariableError, VariableValue};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const DASHBOARD: &str = r#"{
    "uid": "svc-overview",
    "title": "Service overview",
    "time": {"from": "now-1h", "to": "now"},
    "refresh": "30s",
    "templating": {
        "list": [
            {
                "name": "region",
                "type": "custom",
                "query": "us-east,us-west,eu-west",
                "multi": true,
                "includeAll": true,
                "current": {"text": ["us-west"], "value": ["us-west"]}
            },
            {"name": "job", "type": "custom", "query": "api,worker"},
            {"name": "env", "type": "constant", "query": "prod"}
        ]
    },
    "panels": [
        {
            "id": 1,
            "type": "timeseries",
            "title": "Requests",
            "targets": [{"refId": "A", "expr": "rate(http_requests{region=~\"${region:pipe}\"}[5m])"}]
        },
        {
            "id": 2,
            "type": "stat",
            "title": "Workers",
            "timeFrom": "6h",
            "targets": [{"refId": "A", "expr": "up{job=\"$job\",env=\"$env\"}"}]
        },
        {
            "id": 10,
            "type": "row",
            "title": "Hosts",
            "panels": [
                {
                    "id": 11,
                    "type": "timeseries",
                    "title": "Load",
                    "scopedVars": {"host": {"text": "web-1", "value": "web-1"}},
                    "targets": [{"refId": "B", "expr": "load{host=\"$host\"}"}]
                }
            ]
        }
    ]
}"#;

const SINGLE: &str = r#"{
    "title": "Single",
    "panels": [{"id": 1, "title": "Only", "targets": [{"refId": "A", "expr": "up"}]}]
}"#;

fn load_single(fetcher: Arc<dyn QueryFetcher>) -> Dashboard {
    Dashboard::from_json(SINGLE, fetcher, &EngineConfig::default()).unwrap()
}

fn load(fetcher: Arc<dyn QueryFetcher>) -> Dashboard {
    Dashboard::from_json(DASHBOARD, fetcher, &EngineConfig::default()).unwrap()
}

fn request_id(dashboard: &Dashboard, panel: u64) -> u64 {
    let node = dashboard.panel(panel).unwrap().queries[0].node().unwrap();
    node.state().get(REQUEST_ID_KEY).and_then(|v| v.as_u64()).unwrap()
}

#[test]
fn builds_panels_in_tree_order() {
    let dashboard = load(EchoFetcher::new());

    assert_eq!(dashboard.title(), "Service overview");
    let ids: Vec<_> = dashboard.panels().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(11)]);
    assert_eq!(dashboard.schedulers().len(), 3);
    assert!(dashboard.panel(10).is_none(), "rows are not panels");

    let load_panel = dashboard.panel(11).unwrap();
    let row = load_panel.node.parent().unwrap();
    assert_eq!(row.kind(), "row");
    assert!(Arc::ptr_eq(&row.parent().unwrap(), dashboard.root()));
}

#[test]
fn variables_come_from_templating() {
    let dashboard = load(EchoFetcher::new());

    let names: Vec<_> = dashboard.variables().into_iter().map(|b| b.name).collect();
    assert_eq!(names, vec!["region", "job", "env"]);

    let region = dashboard.variable("region").unwrap();
    assert!(region.is_multi);
    assert_eq!(region.value, VariableValue::Multi(vec!["us-west".into()]));
    assert_eq!(dashboard.variable("job").unwrap().value, VariableValue::Single("api".into()));
    assert_eq!(dashboard.variable("env").unwrap().value, VariableValue::Single("prod".into()));
}

#[tokio::test(start_paused = true)]
async fn activation_runs_every_query() {
    let fetcher = EchoFetcher::new();
    let dashboard = load(fetcher.clone());

    dashboard.activate().unwrap();
    assert!(dashboard.wait_settled(Duration::from_secs(1)).await);

    let mut exprs: Vec<_> = fetcher.calls().into_iter().map(|r| r.definition.expr).collect();
    exprs.sort();
    assert_eq!(
        exprs,
        vec![
            "load{host=\"web-1\"}".to_string(),
            "rate(http_requests{region=~\"us-west\"}[5m])".to_string(),
            "up{job=\"api\",env=\"prod\"}".to_string(),
        ]
    );

    let report = dashboard.report();
    assert_eq!(report["panels"][0]["queries"][0]["phase"], "idle");
    assert_eq!(report["panels"][0]["queries"][0]["status"], "done");
    assert_eq!(report["panels"][0]["queries"][0]["requestId"], 1);

    dashboard.deactivate();
    assert!(!dashboard.is_active());
}

#[tokio::test(start_paused = true)]
async fn variable_change_refetches_only_dependents() {
    let fetcher = EchoFetcher::new();
    let dashboard = load(fetcher.clone());
    dashboard.activate().unwrap();
    settle().await;
    assert_eq!(fetcher.call_count(), 3);

    dashboard
        .set_variable("region", vec!["us-east".to_string(), "eu-west".to_string()])
        .unwrap();
    settle().await;

    assert_eq!(fetcher.call_count(), 4);
    let last = fetcher.calls().pop().unwrap();
    assert_eq!(last.definition.expr, "rate(http_requests{region=~\"us-east|eu-west\"}[5m])");
    assert_eq!(request_id(&dashboard, 1), 2);
    assert_eq!(request_id(&dashboard, 2), 1);
    assert_eq!(request_id(&dashboard, 11), 1);
}

#[tokio::test(start_paused = true)]
async fn time_range_change_issues_one_request_per_query() {
    let fetcher = EchoFetcher::new();
    let dashboard = load(fetcher.clone());
    dashboard.activate().unwrap();
    settle().await;

    dashboard.set_time_range(&RawTimeRange::new("now-24h", "now")).unwrap();
    settle().await;

    assert_eq!(dashboard.time_range(), RawTimeRange::new("now-24h", "now"));
    assert_eq!(request_id(&dashboard, 1), 2);
    assert_eq!(request_id(&dashboard, 11), 2);
    // Panel 2 has its own range and does not see the dashboard's
    assert_eq!(request_id(&dashboard, 2), 1);
}

#[tokio::test(start_paused = true)]
async fn panel_time_override_shadows_dashboard_range() {
    let fetcher = EchoFetcher::new();
    let dashboard = load(fetcher.clone());
    dashboard.activate().unwrap();
    settle().await;

    let workers = fetcher
        .calls()
        .into_iter()
        .find(|r| r.definition.expr.starts_with("up"))
        .unwrap();
    assert_eq!(workers.time_range.unwrap().raw, RawTimeRange::new("now-6h", "now"));

    let requests = fetcher
        .calls()
        .into_iter()
        .find(|r| r.definition.expr.starts_with("rate"))
        .unwrap();
    assert_eq!(requests.time_range.unwrap().raw, RawTimeRange::new("now-1h", "now"));
}

#[tokio::test(start_paused = true)]
async fn refresh_supersedes_pending_request() {
    let fetcher = ManualFetcher::new();
    let dashboard = load_single(fetcher.clone());
    dashboard.activate().unwrap();
    settle().await;
    assert_eq!(fetcher.request_ids(), vec![1]);
    assert!(!dashboard.is_settled());

    dashboard.refresh();
    settle().await;
    assert_eq!(fetcher.request_ids(), vec![1, 2]);
    assert!(fetcher.token(1).unwrap().is_cancelled());

    fetcher.succeed(2, json!({"ok": true}));
    settle().await;
    assert!(dashboard.is_settled());
    assert_eq!(dashboard.report()["panels"][0]["queries"][0]["data"], json!({"ok": true}));
}

#[tokio::test(start_paused = true)]
async fn dry_run_reports_interpolated_requests() {
    let dashboard = load(Arc::new(DryRunFetcher));
    dashboard.activate().unwrap();
    assert!(dashboard.wait_settled(Duration::from_secs(1)).await);

    let node = dashboard.panel(11).unwrap().queries[0].node().unwrap();
    let data = node.state().get(DATA_KEY).map(|v| (**v).clone()).unwrap();
    assert_eq!(data["definition"]["expr"], "load{host=\"web-1\"}");
    assert_eq!(data["requestId"], 1);
    assert_eq!(data["variables"]["host"], "web-1");
}

#[tokio::test(start_paused = true)]
async fn wait_settled_wakes_on_completion() {
    let fetcher = ManualFetcher::new();
    let dashboard = load_single(fetcher.clone());
    dashboard.activate().unwrap();

    assert!(!dashboard.wait_settled(Duration::from_millis(50)).await);
    assert_eq!(fetcher.request_ids(), vec![1]);

    let resolver = Arc::clone(&fetcher);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        resolver.succeed(1, json!("done"));
    });
    let started = tokio::time::Instant::now();
    assert!(dashboard.wait_settled(Duration::from_secs(5)).await);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(dashboard.is_settled());
}

#[tokio::test(start_paused = true)]
async fn deactivation_cancels_in_flight_query() {
    let fetcher = ManualFetcher::new();
    let dashboard = load_single(fetcher.clone());
    dashboard.activate().unwrap();
    settle().await;
    assert_eq!(dashboard.schedulers()[0].phase(), SchedulerPhase::FetchInFlight);

    dashboard.deactivate();
    assert!(fetcher.token(1).unwrap().is_cancelled());
    assert_eq!(dashboard.schedulers()[0].phase(), SchedulerPhase::Idle);

    // A late answer for the cancelled request changes nothing
    fetcher.succeed(1, json!({"late": true}));
    settle().await;
    assert!(dashboard.schedulers()[0].result().is_none());
}

#[test]
fn interpolate_from_panel_or_dashboard() {
    let dashboard = load(EchoFetcher::new());

    assert_eq!(dashboard.interpolate("$job/$env", None).unwrap(), "api/prod");
    assert_eq!(dashboard.interpolate("$host", Some(11)).unwrap(), "web-1");
    // Not visible from the dashboard root
    assert_eq!(dashboard.interpolate("$host", None).unwrap(), "$host");

    let err = dashboard.interpolate("$job", Some(99)).unwrap_err();
    assert!(matches!(err, DashboardError::UnknownPanel(99)));
}

#[test]
fn constant_variables_are_read_only() {
    let dashboard = load(EchoFetcher::new());

    let err = dashboard.set_variable("env", "dev").unwrap_err();
    assert!(matches!(err, DashboardError::Variable(VariableError::ReadOnly(_))));

    let err = dashboard.set_variable("nope", "x").unwrap_err();
    assert!(matches!(err, DashboardError::Variable(VariableError::UnknownVariable(_))));
}

#[test]
fn invalid_time_range_is_rejected() {
    let dashboard = load(EchoFetcher::new());

    let err = dashboard
        .set_time_range(&RawTimeRange::new("yesterday-ish", "now"))
        .unwrap_err();
    assert!(matches!(err, DashboardError::InvalidTimeRange(_)));
    assert_eq!(dashboard.time_range(), RawTimeRange::new("now-1h", "now"));

    let bad = DASHBOARD.replace("\"now-1h\"", "\"now-1h→\"");
    let err = Dashboard::from_json(&bad, EchoFetcher::new(), &EngineConfig::default()).unwrap_err();
    assert!(matches!(err, DashboardError::InvalidTimeRange(_)));

    let bad = DASHBOARD.replace("\"6h\"", "\"soon\"");
    let err = Dashboard::from_json(&bad, EchoFetcher::new(), &EngineConfig::default()).unwrap_err();
    assert!(matches!(err, DashboardError::InvalidTimeRange(_)));
}

#[test]
fn snapshot_writes_back_current_values() {
    let dashboard = load(EchoFetcher::new());
    dashboard.set_variable("job", "worker").unwrap();
    dashboard.set_time_range(&RawTimeRange::new("now-7d", "now")).unwrap();

    let snapshot = dashboard.snapshot();
    assert_eq!(snapshot.time.unwrap().from, "now-7d");
    let job = &snapshot.templating.list[1];
    assert_eq!(job.current.as_ref().unwrap().value, VariableValue::Single("worker".into()));
    assert_eq!(snapshot.extra["refresh"], "30s");

    let json: serde_json::Value = serde_json::from_str(&dashboard.to_json().unwrap()).unwrap();
    assert_eq!(json["uid"], "svc-overview");
    assert_eq!(json["panels"][2]["panels"][0]["scopedVars"]["host"]["value"], "web-1");
}

#[test]
fn missing_time_uses_configured_default() {
    let config = EngineConfig::default().with_default_time_range(RawTimeRange::new("now-30m", "now"));
    let dashboard =
        Dashboard::from_json(r#"{"title": "empty"}"#, EchoFetcher::new(), &config).unwrap();
    assert_eq!(dashboard.time_range(), RawTimeRange::new("now-30m", "now"));
    assert!(dashboard.panels().is_empty());
    assert!(dashboard.is_settled());
}

#[test]
fn loads_dashboard_and_config_from_files() {
    let dir = tempfile::tempdir().unwrap();

    let dashboard_path = dir.path().join("dashboard.json");
    std::fs::File::create(&dashboard_path)
        .unwrap()
        .write_all(DASHBOARD.as_bytes())
        .unwrap();
    let config_path = dir.path().join("engine.toml");
    std::fs::write(&config_path, "[scheduler]\ndebounce_ms = 25\n").unwrap();

    let config = EngineConfig::from_path(&config_path).unwrap();
    assert_eq!(config.scheduler.debounce(), Duration::from_millis(25));

    let dashboard = Dashboard::from_path(&dashboard_path, EchoFetcher::new(), &config).unwrap();
    assert_eq!(dashboard.panels().len(), 3);
    assert_eq!(dashboard.schedulers()[0].config().debounce_ms, 25);

    let err = Dashboard::from_path(dir.path().join("missing.json"), EchoFetcher::new(), &config)
        .unwrap_err();
    assert!(matches!(err, DashboardError::Io(_)));
}

#[test]
fn malformed_json_is_parse_error() {
    let err = Dashboard::from_json("{ not json", EchoFetcher::new(), &EngineConfig::default())
        .unwrap_err();
    assert!(matches!(err, DashboardError::Parse(_)));
}

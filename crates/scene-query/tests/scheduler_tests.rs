use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use scene_core::{RawTimeRange, SceneNode, TimeRangeScope};
use scene_query::prelude::*;
use scene_query::{fetcher_fn, DATA_KEY, ERROR_KEY, REQUEST_ID_KEY, STATUS_KEY};
use scene_test_utils::{child, dashboard_node, define, settle, EchoFetcher, ManualFetcher};
use scene_variables::{VariableBinding, VariableSet};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn data(node: &SceneNode) -> Option<Value> {
    node.state().get(DATA_KEY).map(|v| (**v).clone())
}

fn request_id(node: &SceneNode) -> Option<u64> {
    node.state().get(REQUEST_ID_KEY).and_then(|v| v.as_u64())
}

#[tokio::test(start_paused = true)]
async fn time_range_change_issues_exactly_one_new_request() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");
    let fetcher = ManualFetcher::new();
    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
        .watch_time_range()
        .install(&query);

    root.activate_subtree().unwrap();
    settle().await;
    assert!(fetcher.succeed(1, json!("first")));
    settle().await;
    let previous = scheduler.last_request_id();

    TimeRangeScope::update(&root, &RawTimeRange::new("now-6h", "now"));
    settle().await;

    assert_eq!(fetcher.request_ids(), vec![previous, previous + 1]);
    let request = fetcher.last_request().unwrap();
    assert_eq!(request.time_range.unwrap().raw.from, "now-6h");

    assert!(fetcher.succeed(previous + 1, json!("second")));
    settle().await;
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    assert_eq!(data(&query), Some(json!("second")));
    assert_eq!(request_id(&query), Some(previous + 1));
    assert_eq!(scheduler.result().unwrap().data, json!("second"));
}

#[tokio::test(start_paused = true)]
async fn superseding_request_cancels_previous_before_fetching() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");

    let tokens: Arc<Mutex<Vec<CancellationToken>>> = Arc::default();
    let previous_cancelled_at_call: Arc<Mutex<Vec<bool>>> = Arc::default();
    let (t, seen) = (Arc::clone(&tokens), Arc::clone(&previous_cancelled_at_call));
    let fetcher = fetcher_fn(move |_request, cancel: CancellationToken| {
        let all_cancelled = t.lock().iter().all(CancellationToken::is_cancelled);
        seen.lock().push(all_cancelled);
        t.lock().push(cancel.clone());
        async move {
            cancel.cancelled().await;
            Err(FetchError::Cancelled)
        }
    });

    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher).install(&query);
    root.activate_subtree().unwrap();
    settle().await;
    assert_eq!(scheduler.phase(), SchedulerPhase::FetchInFlight);

    scheduler.refresh();
    settle().await;
    scheduler.refresh();
    settle().await;

    assert_eq!(*previous_cancelled_at_call.lock(), vec![true, true, true]);
    let tokens = tokens.lock();
    assert_eq!(tokens.len(), 3);
    assert!(tokens[0].is_cancelled() && tokens[1].is_cancelled());
    assert!(!tokens[2].is_cancelled());
    assert_eq!(scheduler.phase(), SchedulerPhase::FetchInFlight);
}

#[tokio::test(start_paused = true)]
async fn late_result_of_superseded_request_is_discarded() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");
    let fetcher = ManualFetcher::new();
    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone()).install(&query);

    root.activate_subtree().unwrap();
    settle().await;
    scheduler.refresh();
    settle().await;
    assert_eq!(fetcher.request_ids(), vec![1, 2]);
    assert!(fetcher.token(1).unwrap().is_cancelled());

    assert!(fetcher.succeed(2, json!("two")));
    settle().await;
    // request 1 was dropped on supersession; its answer has nowhere to go
    assert!(!fetcher.succeed(1, json!("one")));
    settle().await;

    assert_eq!(data(&query), Some(json!("two")));
    assert_eq!(request_id(&query), Some(2));
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn result_arriving_while_newer_request_pending_is_discarded() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");
    let fetcher = ManualFetcher::new();
    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
        .with_config(SchedulerConfig::default().with_debounce(std::time::Duration::from_millis(50)))
        .install(&query);

    root.activate_subtree().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert_eq!(fetcher.request_ids(), vec![1]);

    // request 2 is reserved but still debouncing when 1 answers
    scheduler.refresh();
    assert_eq!(scheduler.phase(), SchedulerPhase::FetchPending);
    assert!(fetcher.succeed(1, json!("one")));
    settle().await;
    assert_eq!(data(&query), None);
    assert_eq!(scheduler.phase(), SchedulerPhase::FetchPending);

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert!(fetcher.succeed(2, json!("two")));
    settle().await;
    assert_eq!(data(&query), Some(json!("two")));
}

#[tokio::test(start_paused = true)]
async fn errors_are_not_sticky() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");
    let fetcher = ManualFetcher::new();
    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
        .watch_time_range()
        .install(&query);

    root.activate_subtree().unwrap();
    settle().await;
    assert!(fetcher.fail(1, "502 bad gateway"));
    settle().await;

    assert_eq!(scheduler.phase(), SchedulerPhase::FetchError);
    assert_eq!(scheduler.error(), Some(FetchError::backend("502 bad gateway")));
    assert_eq!(query.state().get_str(STATUS_KEY), Some("error"));
    assert!(query.state().contains_key(ERROR_KEY));

    TimeRangeScope::update(&root, &RawTimeRange::new("now-2h", "now"));
    assert_eq!(scheduler.phase(), SchedulerPhase::FetchPending);
    settle().await;
    assert!(fetcher.succeed(2, json!([1, 2, 3])));
    settle().await;

    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    assert_eq!(scheduler.error(), None);
    assert!(!query.state().contains_key(ERROR_KEY));
    assert_eq!(data(&query), Some(json!([1, 2, 3])));
}

#[tokio::test(start_paused = true)]
async fn failing_fast_still_cancels_the_request_in_flight() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");
    let fetcher = ManualFetcher::new();
    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
        .watch_time_range()
        .install(&query);

    root.activate_subtree().unwrap();
    settle().await;
    assert_eq!(scheduler.phase(), SchedulerPhase::FetchInFlight);

    // Inverted range: request 2 cannot be built
    TimeRangeScope::update(&root, &RawTimeRange::new("now", "now-1h"));
    settle().await;

    assert_eq!(scheduler.phase(), SchedulerPhase::FetchError);
    assert_eq!(scheduler.last_request_id(), 2);
    assert!(matches!(scheduler.error(), Some(FetchError::Malformed(_))));
    assert!(fetcher.token(1).unwrap().is_cancelled());
    assert_eq!(fetcher.call_count(), 1);

    // The cancelled fetch can no longer publish
    assert!(!fetcher.succeed(1, json!("late")));
    settle().await;
    assert_eq!(data(&query), None);
    assert_eq!(request_id(&query), Some(2));

    TimeRangeScope::update(&root, &RawTimeRange::new("now-2h", "now"));
    settle().await;
    assert_eq!(fetcher.request_ids(), vec![1, 3]);
    assert!(fetcher.succeed(3, json!("recovered")));
    settle().await;
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    assert_eq!(data(&query), Some(json!("recovered")));
}

#[tokio::test(start_paused = true)]
async fn deactivation_cancels_and_resets_without_publishing() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");
    let fetcher = ManualFetcher::new();
    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
        .watch_time_range()
        .install(&query);

    root.activate_subtree().unwrap();
    settle().await;
    assert_eq!(query.state().get_str(STATUS_KEY), Some("loading"));
    let version = query.state().version();

    root.deactivate_subtree();
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    assert!(fetcher.token(1).unwrap().is_cancelled());

    fetcher.succeed(1, json!("late"));
    TimeRangeScope::update(&root, &RawTimeRange::new("now-3h", "now"));
    settle().await;

    assert_eq!(query.state().version(), version);
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn deactivation_during_debounce_drops_pending_request() {
    let root = dashboard_node("now-1h", "now");
    let query = child(&root, "query");
    let fetcher = ManualFetcher::new();
    let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
        .with_config(SchedulerConfig::default().with_debounce(std::time::Duration::from_millis(100)))
        .install(&query);

    root.activate_subtree().unwrap();
    root.deactivate_subtree();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert_eq!(fetcher.call_count(), 0);
    assert_eq!(scheduler.phase(), SchedulerPhase::Idle);

    // reactivation starts over with the next request id
    root.activate_subtree().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(fetcher.request_ids(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn activation_cycle_leaves_no_residual_subscriptions() {
    let root = dashboard_node("now-1h", "now");
    define(&root, VariableBinding::new("env", "prod"));
    let panel = child(&root, "panel");
    let query = child(&panel, "query");
    let _scheduler = QueryScheduler::new(QueryDefinition::new("A", "up{env=\"$env\"}"), EchoFetcher::new())
        .watch_time_range()
        .watch_variables(["env"])
        .install(&query);

    let before = root.subscriber_count();
    root.activate_subtree().unwrap();
    assert_eq!(root.subscriber_count(), before + 1);
    assert!(query.has_extension::<scene_core::DependencyTracker>());

    root.deactivate_subtree();
    assert_eq!(root.subscriber_count(), before);
    assert!(!query.has_extension::<scene_core::DependencyTracker>());
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn variable_update_refetches_every_dependent_scheduler() {
    let root = dashboard_node("now-1h", "now");
    define(&root, VariableBinding::new("region", "us-east").with_multi());
    define(&root, VariableBinding::new("unrelated", "x"));
    let fetcher = EchoFetcher::new();

    let schedulers: Vec<_> = (0..2)
        .map(|i| {
            let query = child(&root, "query");
            QueryScheduler::new(
                QueryDefinition::new(format!("Q{i}"), "region=${region}"),
                fetcher.clone(),
            )
            .watch_variables(["region"])
            .install(&query)
        })
        .collect();

    root.activate_subtree().unwrap();
    settle().await;
    assert_eq!(fetcher.call_count(), 2);

    VariableSet::update(&root, "unrelated", "y").unwrap();
    settle().await;
    assert_eq!(fetcher.call_count(), 2);

    VariableSet::update(&root, "region", vec!["us-west", "eu-west"]).unwrap();
    settle().await;

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 4);
    for request in &calls[2..] {
        assert_eq!(request.definition.expr, "region=us-west,eu-west");
        assert_eq!(request.request_id, 2);
    }
    for scheduler in &schedulers {
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    }
}

#[tokio::test(start_paused = true)]
async fn panel_scoped_time_range_shadows_dashboard() {
    let root = dashboard_node("now-1h", "now");
    let panel = child(&root, "panel");
    TimeRangeScope::install(&panel, &RawTimeRange::new("now-7d", "now"));
    let query = child(&panel, "query");
    let fetcher = EchoFetcher::new();
    let _scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
        .watch_time_range()
        .install(&query);

    root.activate_subtree().unwrap();
    settle().await;

    // dashboard range changes do not reach a panel with its own range
    TimeRangeScope::update(&root, &RawTimeRange::new("now-2h", "now"));
    settle().await;

    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(fetcher.calls()[0].time_range.as_ref().unwrap().raw.from, "now-7d");
}

proptest::proptest! {
    #[test]
    fn prop_at_most_one_request_in_flight(bursts in proptest::collection::vec(1usize..4, 1..8)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        runtime.block_on(async {
            let root = dashboard_node("now-1h", "now");
            let query = child(&root, "query");
            let fetcher = ManualFetcher::new();
            let scheduler = QueryScheduler::new(QueryDefinition::new("A", "up"), fetcher.clone())
                .watch_time_range()
                .install(&query);
            root.activate_subtree().unwrap();
            settle().await;

            for (i, burst) in bursts.iter().enumerate() {
                for j in 0..*burst {
                    let from = format!("now-{}h", i * 10 + j + 2);
                    TimeRangeScope::update(&root, &RawTimeRange::new(from, "now"));
                }
                settle().await;
                let live = fetcher.calls().iter().filter(|c| !c.cancel.is_cancelled()).count();
                assert_eq!(live, 1);
            }

            // one request per burst plus the activation request
            assert_eq!(fetcher.call_count(), bursts.len() + 1);
            let last = scheduler.last_request_id();
            assert_eq!(fetcher.request_ids().last().copied(), Some(last));

            assert!(fetcher.succeed(last, json!("final")));
            settle().await;
            assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
            assert_eq!(data(&query), Some(json!("final")));
        });
    }
}

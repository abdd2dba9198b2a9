use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use scene_core::prelude::*;
use scene_core::{DependencyBinding, SceneError};
use serde_json::json;
use std::sync::Arc;

/// Activation handler that watches `from`/`to` of the nearest time-range scope
fn watch_time_range(node: &SceneNode) {
    node.add_activation_handler(|node| {
        let Some(scope) = TimeRangeScope::nearest(node) else {
            return Ok(None);
        };
        let binding: DependencyBinding = DependencyTracker::new(node.id())
            .watch(&scope, TimeRangeScope::keys())
            .connect(|_, _| {});
        Ok(Some(Box::new(move || binding.release()) as Cleanup))
    });
}

#[test]
fn activate_then_deactivate_leaves_no_residual_subscriptions() {
    let root = SceneNode::new("dashboard");
    TimeRangeScope::install(&root, &RawTimeRange::new("now-1h", "now"));
    let panel = SceneNode::new("panel");
    panel.attach(&root).unwrap();
    let query = SceneNode::new("query");
    query.attach(&panel).unwrap();
    watch_time_range(&panel);
    watch_time_range(&query);

    let before = root.subscriber_count();
    root.activate_subtree().unwrap();
    assert_eq!(root.subscriber_count(), before + 2);

    root.deactivate_subtree();
    assert_eq!(root.subscriber_count(), before);
}

#[test]
fn detaching_active_subtree_releases_ancestor_subscriptions() {
    let root = SceneNode::new("dashboard");
    TimeRangeScope::install(&root, &RawTimeRange::new("now-1h", "now"));
    let panel = SceneNode::new("panel");
    panel.attach(&root).unwrap();
    let query = SceneNode::new("query");
    query.attach(&panel).unwrap();
    watch_time_range(&query);

    root.activate_subtree().unwrap();
    assert_eq!(root.subscriber_count(), 1);

    panel.detach();
    assert_eq!(root.subscriber_count(), 0);
    assert!(!panel.is_active());
    assert!(!query.is_active());
    assert!(root.children().is_empty());
}

#[test]
fn reactivating_active_node_is_an_error() {
    let node = SceneNode::new("n");
    node.activate().unwrap();
    assert_eq!(node.activate(), Err(SceneError::AlreadyActive(node.id())));
}

#[test]
fn subtree_activation_rolls_back_on_failure() {
    let root = SceneNode::new("root");
    let ok = SceneNode::new("ok");
    let bad = SceneNode::new("bad");
    ok.attach(&root).unwrap();
    bad.attach(&root).unwrap();
    bad.add_activation_handler(|_| Err(scene_core::HandlerError::new("no datasource")));

    let err = root.activate_subtree().unwrap_err();
    assert!(matches!(err, SceneError::ActivationFailed { .. }));
    assert!(!root.is_active());
    assert!(!ok.is_active());
}

#[test]
fn causal_set_state_completes_before_outer_returns() {
    let source = SceneNode::new("source");
    let derived = SceneNode::new("derived");
    let log = Arc::new(Mutex::new(Vec::new()));

    let d = Arc::clone(&derived);
    let _s1 = source.subscribe(move |change| {
        let v = change.current.get("n").map(|v| v.as_i64().unwrap_or(0)).unwrap_or(0);
        d.set_state(StatePatch::new().set("double", v * 2));
    });
    let l = Arc::clone(&log);
    let _s2 = derived.subscribe(move |change| {
        l.lock().push(format!("derived {}", change.current.get("double").map_or(json!(null), |v| (**v).clone())));
    });
    let l = Arc::clone(&log);
    let _s3 = source.subscribe(move |_| l.lock().push("source observer".to_string()));

    source.set_state(StatePatch::new().set("n", 21));

    assert_eq!(*log.lock(), vec!["derived 42", "source observer"]);
}

proptest! {
    #[test]
    fn prop_last_write_wins(values in proptest::collection::vec(any::<i64>(), 1..50)) {
        let node = SceneNode::new("n");
        for v in &values {
            node.set_state(StatePatch::new().set("k", *v));
        }
        let state = node.state();
        prop_assert_eq!(state.get("k").and_then(|v| v.as_i64()), values.last().copied());
        prop_assert_eq!(state.version(), values.len() as u64);
    }

    #[test]
    fn prop_descendant_order_is_preorder(widths in proptest::collection::vec(0usize..4, 1..6)) {
        // Build a root with `widths.len()` children, child i having widths[i] leaves
        let root = SceneNode::new("root");
        let mut expected = Vec::new();
        for (i, w) in widths.iter().enumerate() {
            let child = SceneNode::new(format!("c{i}"));
            child.attach(&root).unwrap();
            expected.push(format!("c{i}"));
            for j in 0..*w {
                let leaf = SceneNode::new(format!("c{i}.{j}"));
                leaf.attach(&child).unwrap();
                expected.push(format!("c{i}.{j}"));
            }
        }
        let kinds: Vec<String> = root.find_descendants(|_| true).iter().map(|n| n.kind().to_string()).collect();
        prop_assert_eq!(kinds, expected);
    }
}

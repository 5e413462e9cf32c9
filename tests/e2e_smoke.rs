//! End-to-end: YAML document → plan → diagram → execution.

use batchplan_core::config::{ExecConfig, PlannerConfig};
use batchplan_core::{LayerPlanId, Value};
use batchplan_exec::{ExecutionInput, Executor};
use batchplan_planner::{
    build_plan, parse_yaml_request, print_plan_graph, verify_plan, FieldPlans, LayerReason,
    PrintOptions,
};
use serde_json::json;

const FEED: &str = r#"
config:
  max_concurrent_batches: 2
request:
  root_type: Query
  selections:
    - field: feed
      kind: polymorphic
      type: FeedItem
      list: true
      possible_types: [Photo, Note]
      selections:
        - field: id
          nullable: false
      fragments:
        - on: Photo
          selections: [ { field: url } ]
        - on: Note
          selections: [ { field: text } ]
"#;

fn feed_input() -> ExecutionInput {
    ExecutionInput::new(Value::from(json!({
        "feed": [
            { "__typename": "Photo", "id": 1, "url": "a.png" },
            { "__typename": "Note", "id": 2, "text": "hello" },
            { "__typename": "Photo", "id": 3, "url": "b.png" }
        ]
    })))
}

#[tokio::test]
async fn test_list_of_variants_end_to_end() {
    let doc = parse_yaml_request(FEED).unwrap();
    let mut planner_cfg = PlannerConfig::default();
    let mut exec_cfg = ExecConfig::default();
    if let Some(cfg) = &doc.config {
        cfg.apply_planner(&mut planner_cfg);
        cfg.apply_exec(&mut exec_cfg);
    }
    assert_eq!(exec_cfg.max_concurrent_batches, 2);

    let plan = build_plan(&doc.request, &FieldPlans::new(), planner_cfg).unwrap();
    verify_plan(&plan).unwrap();

    // root, one list-item bucket, one branch bucket per variant
    let reasons: Vec<_> = plan.layer_plans().iter().map(|lp| lp.reason.clone()).collect();
    assert_eq!(reasons.len(), 4);
    assert_eq!(reasons[0], LayerReason::Root);
    assert_eq!(reasons[1], LayerReason::ListItem);
    let item = &plan.layer_plans()[1];
    assert_eq!(item.children.len(), 2);
    let photo = item.children[0];
    let note = item.children[1];

    let result = Executor::new(exec_cfg)
        .unwrap()
        .execute(&plan, feed_input())
        .await
        .unwrap();

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.manifest.rows(LayerPlanId::new(1)), Some(3));
    assert_eq!(result.manifest.rows(photo), Some(2));
    assert_eq!(result.manifest.rows(note), Some(1));
    assert_eq!(
        result.to_json(),
        json!({
            "data": {
                "feed": [
                    { "id": 1, "url": "a.png" },
                    { "id": 2, "text": "hello" },
                    { "id": 3, "url": "b.png" }
                ]
            }
        })
    );
    assert!(result.manifest.finished_ms >= result.manifest.started_ms);
    assert_eq!(result.manifest.plan_hash, plan.fingerprint().unwrap());
}

#[test]
fn test_explain_renders_every_bucket() {
    let doc = parse_yaml_request(FEED).unwrap();
    let plan = build_plan(&doc.request, &FieldPlans::new(), PlannerConfig::default()).unwrap();
    let graph = print_plan_graph(&plan, PrintOptions::default()).unwrap();

    assert!(graph.starts_with("graph TD"));
    for lp in plan.layer_plans() {
        assert!(graph.contains(&format!("Bucket{}", lp.id.get())), "{graph}");
    }
    assert!(graph.contains("listItem"));
    assert!(graph.contains("polymorphic(Photo)"));
    assert!(graph.contains("polymorphic(Note)"));
}

#[test]
fn test_fingerprint_is_stable_across_builds() {
    let doc = parse_yaml_request(FEED).unwrap();
    let a = build_plan(&doc.request, &FieldPlans::new(), PlannerConfig::default()).unwrap();
    let b = build_plan(&doc.request, &FieldPlans::new(), PlannerConfig::default()).unwrap();
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

    let description = serde_json::to_value(a.describe()).unwrap();
    assert_eq!(description["root_type"], json!("Query"));
    assert_eq!(description["layer_plans"].as_array().map(Vec::len), Some(4));
}

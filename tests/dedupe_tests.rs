//! Deduplication across a full bucket tree, and its effect on execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use batchplan_core::config::{ExecConfig, PlannerConfig};
use batchplan_core::Value;
use batchplan_exec::{ExecutionInput, Executor};
use batchplan_planner::steps::{AccessStep, BatchLoader, LoadStep};
use batchplan_planner::{
    build_plan, deduplicate, verify_plan, FieldPlans, RequestNode, RequestTree, RowResult,
    StepError,
};

struct CountingLoader {
    calls: AtomicUsize,
}

#[async_trait]
impl BatchLoader for CountingLoader {
    fn name(&self) -> &str {
        "users_by_id"
    }

    async fn load(&self, keys: Vec<Value>) -> Result<Vec<RowResult>, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(keys
            .into_iter()
            .map(|k| Ok(Value::from(serde_json::json!({ "id": k.to_json(), "name": "n" }))))
            .collect())
    }
}

fn friend_plans(loader: Arc<CountingLoader>) -> FieldPlans {
    let mut plans = FieldPlans::new();
    plans.register("User", "friend", move |ctx, parent, _| {
        let id = ctx.add_step(AccessStep::new("friendId"), &[parent])?;
        ctx.add_step(LoadStep::new(loader.clone()), &[id])
    });
    plans
}

fn aliased_friends() -> RequestTree {
    let friend = |alias: &str| {
        RequestNode::object("friend", "User", vec![RequestNode::scalar("name")]).alias(alias)
    };
    RequestTree::new(
        "Query",
        vec![RequestNode::object(
            "users",
            "User",
            vec![RequestNode::scalar("id"), friend("a"), friend("b")],
        )
        .list()],
    )
}

fn users_input() -> ExecutionInput {
    ExecutionInput::new(Value::from(serde_json::json!({
        "users": [
            { "id": 1, "friendId": 2 },
            { "id": 2, "friendId": 3 },
            { "id": 3, "friendId": 1 }
        ]
    })))
}

#[test]
fn test_late_dedupe_leaves_no_reference_to_tombstones() {
    let loader = Arc::new(CountingLoader {
        calls: AtomicUsize::new(0),
    });
    let cfg = PlannerConfig {
        dedupe: false,
        ..Default::default()
    };
    let mut plan = build_plan(&aliased_friends(), &friend_plans(loader), cfg).unwrap();
    let before = plan.steps().count();

    let merged = deduplicate(&mut plan).unwrap();
    assert!(merged >= 2, "merged {merged}");
    assert_eq!(plan.steps().count(), before - merged);

    for step in plan.steps() {
        for dep in step.ordering_dependencies() {
            assert!(plan.step(dep).unwrap().is_live(), "{} -> {}", step.id, dep);
        }
    }
    for lp in plan.layer_plans() {
        for id in lp.output_step_ids() {
            assert!(plan.step(id).unwrap().is_live());
        }
    }
    verify_plan(&plan).unwrap();
    assert_eq!(deduplicate(&mut plan).unwrap(), 0);
}

#[tokio::test]
async fn test_merged_loads_are_called_once_per_batch() {
    let loader = Arc::new(CountingLoader {
        calls: AtomicUsize::new(0),
    });
    let plan = build_plan(
        &aliased_friends(),
        &friend_plans(loader.clone()),
        PlannerConfig::default(),
    )
    .unwrap();
    let result = Executor::new(ExecConfig::default())
        .unwrap()
        .execute(&plan, users_input())
        .await
        .unwrap();

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    let users = result.data.get("users").and_then(Value::as_list).unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(users[0].get("a"), users[0].get("b"));
    assert_eq!(
        users[2].get("a").and_then(|f| f.get("name")),
        Some(&Value::from("n"))
    );
}

#[tokio::test]
async fn test_without_dedupe_each_alias_loads() {
    let loader = Arc::new(CountingLoader {
        calls: AtomicUsize::new(0),
    });
    let cfg = PlannerConfig {
        dedupe: false,
        ..Default::default()
    };
    let plan = build_plan(&aliased_friends(), &friend_plans(loader.clone()), cfg).unwrap();
    let result = Executor::new(ExecConfig::default())
        .unwrap()
        .execute(&plan, users_input())
        .await
        .unwrap();

    assert!(result.errors.is_empty());
    // still batched: one call per load step, never one per user
    assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
}

/// A loader that answers every key with a fixed value, under a shared name.
struct FixedLoader {
    answer: &'static str,
}

#[async_trait]
impl BatchLoader for FixedLoader {
    fn name(&self) -> &str {
        "records"
    }

    async fn load(&self, keys: Vec<Value>) -> Result<Vec<RowResult>, StepError> {
        Ok(keys.into_iter().map(|_| Ok(Value::from(self.answer))).collect())
    }
}

#[tokio::test]
async fn test_same_named_loaders_are_not_merged() {
    let users: Arc<dyn BatchLoader> = Arc::new(FixedLoader {
        answer: "from_users_db",
    });
    let orders: Arc<dyn BatchLoader> = Arc::new(FixedLoader {
        answer: "from_orders_db",
    });
    let mut plans = FieldPlans::new();
    for (field, loader) in [("u", users), ("o", orders)] {
        plans.register("Query", field, move |ctx, parent, _| {
            let id = ctx.add_step(AccessStep::new("id"), &[parent])?;
            ctx.add_step(LoadStep::new(loader.clone()), &[id])
        });
    }
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::scalar("u"), RequestNode::scalar("o")],
    );
    let plan = build_plan(&request, &plans, PlannerConfig::default()).unwrap();
    let map = &plan.root_layer_plan().output_map;
    assert_ne!(map["u"].step, map["o"].step);

    let result = Executor::new(ExecConfig::default())
        .unwrap()
        .execute(
            &plan,
            ExecutionInput::new(Value::from(serde_json::json!({ "id": 7 }))),
        )
        .await
        .unwrap();
    assert_eq!(
        result.to_json()["data"],
        serde_json::json!({ "u": "from_users_db", "o": "from_orders_db" })
    );
}

//! Plan construction tests: bucket trees, visibility, callback failures.

use batchplan_core::config::PlannerConfig;
use batchplan_core::{LayerPlanId, StepId, Value};
use batchplan_planner::steps::{AccessStep, LambdaStep};
use batchplan_planner::{
    build_plan, verify_plan, FieldPlans, LayerReason, OutputMode, PlanError, RequestNode,
    RequestTree, Step,
};

fn pets_request() -> RequestTree {
    RequestTree::new(
        "Query",
        vec![RequestNode::polymorphic("pets", "Pet", &["Dog", "Cat"])
            .list()
            .select(RequestNode::scalar("name"))
            .on("Dog", vec![RequestNode::scalar("barks")])
            .on("Cat", vec![RequestNode::scalar("lives")])],
    )
}

#[test]
fn test_list_of_polymorphic_items_bucket_tree() {
    let plan = build_plan(&pets_request(), &FieldPlans::new(), PlannerConfig::default()).unwrap();

    let buckets = plan.layer_plans();
    assert_eq!(buckets.len(), 4);
    assert_eq!(buckets[0].reason, LayerReason::Root);
    assert_eq!(buckets[1].reason, LayerReason::ListItem);
    assert_eq!(buckets[1].parent, Some(LayerPlanId::new(0)));
    assert_eq!(buckets[0].children, vec![LayerPlanId::new(1)]);

    let branches: Vec<_> = buckets[1]
        .children
        .iter()
        .map(|id| plan.layer_plan(*id).unwrap())
        .collect();
    assert_eq!(branches.len(), 2);
    assert!(branches[0].reason.admits("Dog") && !branches[0].reason.admits("Cat"));
    assert!(branches[1].reason.admits("Cat") && !branches[1].reason.admits("Dog"));
    for branch in &branches {
        assert!(branch.children.is_empty());
        // branch rows derive from the list item
        assert_eq!(branch.root_step_id, buckets[1].entry_step_id);
    }
    assert!(branches[0].output_map.contains_key("barks"));
    assert!(!branches[0].output_map.contains_key("lives"));
    assert!(branches[1].output_map.contains_key("name"));

    match &buckets[0].output_map["pets"].mode {
        OutputMode::List(child) => assert_eq!(*child, LayerPlanId::new(1)),
        other => panic!("unexpected mode {other:?}"),
    }
    verify_plan(&plan).unwrap();
}

#[test]
fn test_branch_steps_carry_their_variant() {
    let plan = build_plan(&pets_request(), &FieldPlans::new(), PlannerConfig::default()).unwrap();
    let dog = plan.layer_plans()[1].children[0];
    let steps: Vec<_> = plan.steps_in(dog).collect();
    assert!(!steps.is_empty());
    for step in steps {
        assert!(step.polymorphic_branches.contains("Dog"));
        assert!(!step.polymorphic_branches.contains("Cat"));
    }
    for step in plan.steps_in(LayerPlanId::new(0)) {
        assert!(step.polymorphic_branches.is_empty());
    }
}

#[test]
fn test_uncopied_ancestor_reference_is_rejected() {
    let mut plans = FieldPlans::new();
    plans.register("User", "orgName", |ctx, _, _| {
        // step #0 is the root value, owned by the root bucket
        ctx.add_step(AccessStep::new("org"), &[StepId::new(0)])
    });
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::object("users", "User", vec![RequestNode::scalar("orgName")]).list()],
    );
    let err = build_plan(&request, &plans, PlannerConfig::default()).unwrap_err();
    match err {
        PlanError::Field { path, source } => {
            assert_eq!(path, "users.orgName");
            match *source {
                PlanError::NotVisible { step, bucket } => {
                    assert_eq!(step, StepId::new(0));
                    assert_eq!(bucket, LayerPlanId::new(1));
                }
                other => panic!("expected NotVisible, got {other}"),
            }
        }
        other => panic!("expected Field, got {other}"),
    }
}

#[test]
fn test_copy_in_makes_ancestor_steps_visible() {
    let mut plans = FieldPlans::new();
    plans.register("User", "orgName", |ctx, _, _| {
        let root = ctx.root_value()?;
        ctx.add_step(AccessStep::new("org"), &[root])
    });
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::object(
            "users",
            "User",
            vec![RequestNode::object("friends", "User", vec![RequestNode::scalar("orgName")])
                .list()],
        )
        .list()],
    );
    let plan = build_plan(&request, &plans, PlannerConfig::default()).unwrap();
    let root_value = plan.root_value_step();
    // copied into every bucket between the owner and the user
    assert!(plan.layer_plans()[1].copied_step_ids.contains(&root_value));
    assert!(plan.layer_plans()[2].copied_step_ids.contains(&root_value));
    assert!(plan.layer_plans()[0].copied_step_ids.is_empty());
    verify_plan(&plan).unwrap();
}

#[test]
fn test_callback_failure_carries_field_path() {
    let mut plans = FieldPlans::new();
    plans.register("User", "secret", |_, _, _| {
        Err(PlanError::callback("not allowed"))
    });
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::object("me", "User", vec![RequestNode::scalar("secret")])],
    );
    let err = build_plan(&request, &plans, PlannerConfig::default()).unwrap_err();
    match err {
        PlanError::Callback { path, message } => {
            assert_eq!(path, "me.secret");
            assert_eq!(message, "not allowed");
        }
        other => panic!("expected Callback, got {other}"),
    }
}

#[test]
fn test_propagated_core_error_carries_field_path() {
    let mut plans = FieldPlans::new();
    plans.register("User", "pet", |_, _, _| {
        Err(batchplan_core::Error::InvalidTypeName(String::new()).into())
    });
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::object("me", "User", vec![RequestNode::scalar("pet")])],
    );
    let err = build_plan(&request, &plans, PlannerConfig::default()).unwrap_err();
    assert!(err.to_string().contains("'me.pet'"), "{err}");
    match err {
        PlanError::Field { path, source } => {
            assert_eq!(path, "me.pet");
            assert!(matches!(*source, PlanError::Core(_)), "{source}");
        }
        other => panic!("expected Field, got {other}"),
    }
}

#[test]
fn test_list_field_may_return_a_copied_step() {
    let mut plans = FieldPlans::new();
    plans.register("User", "roles", |ctx, _, _| ctx.context());
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::object(
            "users",
            "User",
            vec![RequestNode::object("roles", "Role", vec![RequestNode::scalar("name")]).list()],
        )
        .list()],
    );
    let plan = build_plan(&request, &plans, PlannerConfig::default()).unwrap();
    let users = &plan.layer_plans()[1];
    let roles = &plan.layer_plans()[2];
    assert_eq!(roles.parent, Some(users.id));
    assert_eq!(roles.root_step_id, Some(plan.context_step()));
    assert!(users.copied_step_ids.contains(&plan.context_step()));
    verify_plan(&plan).unwrap();
}

#[test]
fn test_depth_limit() {
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::object(
            "a",
            "A",
            vec![RequestNode::object("b", "B", vec![RequestNode::scalar("c")])],
        )],
    );
    let cfg = PlannerConfig {
        max_depth: 2,
        ..Default::default()
    };
    let err = build_plan(&request, &FieldPlans::new(), cfg).unwrap_err();
    assert!(matches!(err, PlanError::DepthExceeded { limit: 2, .. }), "{err}");

    let cfg = PlannerConfig {
        max_depth: 3,
        ..Default::default()
    };
    assert!(build_plan(&request, &FieldPlans::new(), cfg).is_ok());
}

#[test]
fn test_side_effects_chain_through_implicit_dependency() {
    let mut plans = FieldPlans::new();
    for field in ["first", "second"] {
        plans.register("Mutation", field, |ctx, _, _| {
            ctx.add_step(
                LambdaStep::new("write", |_| Ok(Value::Null)).with_side_effects(),
                &[],
            )
        });
    }
    plans.register("Mutation", "after", |ctx, parent, _| {
        ctx.add_step(AccessStep::new("x"), &[parent])
    });
    let request = RequestTree::new(
        "Mutation",
        ["first", "second", "after"]
            .into_iter()
            .map(RequestNode::scalar)
            .collect(),
    );
    let plan = build_plan(&request, &plans, PlannerConfig::default()).unwrap();
    let map = &plan.root_layer_plan().output_map;
    let first = plan.step(map["first"].step).unwrap();
    let second = plan.step(map["second"].step).unwrap();
    let after = plan.step(map["after"].step).unwrap();
    assert_eq!(first.implicit_side_effect, None);
    assert_eq!(second.implicit_side_effect, Some(first.id));
    assert_eq!(after.implicit_side_effect, Some(second.id));
    // ordering only: never a positional dependency
    assert!(second.dependencies.is_empty());

    let order = plan.dependency_order(LayerPlanId::new(0)).unwrap();
    let pos = |id: StepId| order.iter().position(|s| *s == id).unwrap();
    assert!(pos(first.id) < pos(second.id));
    assert!(pos(second.id) < pos(after.id));
}

#[test]
fn test_deferred_objects_open_subroutine_buckets() {
    let request = RequestTree::new(
        "Query",
        vec![
            RequestNode::object("profile", "Profile", vec![RequestNode::scalar("bio")]).deferred(),
            RequestNode::scalar("name"),
        ],
    );
    let plan = build_plan(&request, &FieldPlans::new(), PlannerConfig::default()).unwrap();
    let sub = &plan.layer_plans()[1];
    assert_eq!(sub.reason, LayerReason::Subroutine);
    assert!(sub.is_deferred());
    assert!(sub.output_map.contains_key("bio"));
    assert!(matches!(
        plan.root_layer_plan().output_map["profile"].mode,
        OutputMode::Deferred(_)
    ));
}

#[test]
fn test_typename_is_a_constant_of_the_parent_type() {
    let request = RequestTree::new(
        "Query",
        vec![RequestNode::object("me", "User", vec![RequestNode::scalar("__typename")])],
    );
    let plan = build_plan(&request, &FieldPlans::new(), PlannerConfig::default()).unwrap();
    let me = &plan.root_layer_plan().output_map["me"];
    let OutputMode::Object(fields) = &me.mode else {
        panic!("expected object mode");
    };
    let node = plan.step(fields["__typename"].step).unwrap();
    assert_eq!(node.name(), "Constant");
    assert_eq!(node.step().unwrap().params(), Some(Value::from("User")));
}

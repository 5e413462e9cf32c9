//! Structural checks over a finished operation plan.

use std::collections::HashMap;

use batchplan_core::{LayerPlanId, StepId};

use crate::error::{PlanError, Result};
use crate::plan::OperationPlan;

/// Check the plan's structural invariants:
/// - buckets form a tree rooted at bucket 0 with consistent parent/child links;
/// - every dependency of a live step is visible from the step's bucket;
/// - each bucket's dependency graph is acyclic;
/// - copied steps are owned by a strict ancestor;
/// - every step referenced by an output shape or as a bucket root is live.
pub fn verify_plan(plan: &OperationPlan) -> Result<()> {
    let invariant = |msg: String| PlanError::Request(format!("plan invariant: {msg}"));

    for (i, lp) in plan.layer_plans().iter().enumerate() {
        if lp.id.index() != i {
            return Err(invariant(format!("{} stored at index {i}", lp.id)));
        }
        match lp.parent {
            None if i != 0 => return Err(invariant(format!("{} has no parent", lp.id))),
            Some(_) if i == 0 => return Err(invariant("root bucket has a parent".into())),
            Some(parent) => {
                if !plan.layer_plan(parent)?.children.contains(&lp.id) {
                    return Err(invariant(format!("{parent} does not list child {}", lp.id)));
                }
                let root = lp
                    .root_step_id
                    .ok_or_else(|| invariant(format!("{} has no root step", lp.id)))?;
                if !plan.is_visible(root, parent) {
                    return Err(PlanError::NotVisible {
                        step: root,
                        bucket: parent,
                    });
                }
            }
            None => {}
        }
        for child in &lp.children {
            if plan.layer_plan(*child)?.parent != Some(lp.id) {
                return Err(invariant(format!("{child} does not point back at {}", lp.id)));
            }
        }
        for copied in &lp.copied_step_ids {
            let owner = plan.step(*copied)?.layer_plan;
            if !plan.is_ancestor(owner, lp.id) {
                return Err(PlanError::NotVisible {
                    step: *copied,
                    bucket: lp.id,
                });
            }
        }
        for id in lp.output_step_ids() {
            if !plan.step(id)?.is_live() {
                return Err(invariant(format!("{} outputs deduplicated step {id}", lp.id)));
            }
        }
    }

    for node in plan.steps() {
        for dep in node.ordering_dependencies() {
            if !plan.step(dep)?.is_live() {
                return Err(invariant(format!("{} depends on deduplicated step {dep}", node.id)));
            }
            if !plan.is_visible(dep, node.layer_plan) {
                return Err(PlanError::NotVisible {
                    step: dep,
                    bucket: node.layer_plan,
                });
            }
        }
    }

    for layer in plan.layer_plans_dependencies_first() {
        plan.dependency_order(layer)?;
    }
    if plan.layer_plans_dependencies_first().len() != plan.layer_plans().len() {
        return Err(invariant("bucket tree does not reach every bucket".into()));
    }
    Ok(())
}

/// True when `order` lists every live step after all of its in-bucket
/// dependencies. Steps of other buckets are ignored.
pub fn assert_topological(plan: &OperationPlan, layer: LayerPlanId, order: &[StepId]) -> bool {
    let position: HashMap<StepId, usize> =
        order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    plan.steps_in(layer).all(|node| {
        let Some(at) = position.get(&node.id) else {
            return false;
        };
        node.ordering_dependencies().all(|dep| {
            let dep = plan.resolve(dep);
            match plan.step(dep) {
                Ok(d) if d.layer_plan == layer => position.get(&dep).is_some_and(|p| p < at),
                Ok(_) => true,
                Err(_) => false,
            }
        })
    })
}

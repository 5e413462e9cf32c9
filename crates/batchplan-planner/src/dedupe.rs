//! Deduplication: merge structurally identical steps within a bucket.
//!
//! Two live steps of the same bucket are identical when they have the same
//! step name, the same (resolved) positional dependencies, the same implicit
//! side-effect dependency and deep-equal construction parameters. The first
//! constructed step survives; the others become tombstones pointing at it and
//! every reference in the plan is rewritten to the survivor. Side-effect
//! steps and steps without parameters are never merged.

use std::collections::HashMap;

use batchplan_core::hash::{hash_serde, Hash256};
use batchplan_core::{LayerPlanId, StepId};

use crate::error::Result;
use crate::plan::OperationPlan;

type PeerKey = (&'static str, Vec<StepId>, Option<StepId>, Hash256, Option<usize>);

/// Deduplicate one bucket until no more merges apply. Returns the number of
/// steps merged away.
pub fn deduplicate_layer(plan: &mut OperationPlan, layer: LayerPlanId) -> Result<usize> {
    let mut merged = 0;
    loop {
        let n = merge_pass(plan, layer)?;
        if n == 0 {
            break;
        }
        merged += n;
        rewrite_references(plan);
    }
    Ok(merged)
}

/// Deduplicate every bucket, parents before children.
pub fn deduplicate(plan: &mut OperationPlan) -> Result<usize> {
    let mut merged = 0;
    for layer in plan.layer_plans_dependencies_first() {
        merged += deduplicate_layer(plan, layer)?;
    }
    Ok(merged)
}

fn merge_pass(plan: &mut OperationPlan, layer: LayerPlanId) -> Result<usize> {
    let mut peers: HashMap<PeerKey, Vec<StepId>> = HashMap::new();
    let mut replacements: Vec<(StepId, StepId)> = Vec::new();

    let candidates: Vec<StepId> = plan.steps_in(layer).map(|s| s.id).collect();
    for id in candidates {
        let node = plan.step(id)?;
        let Some(step) = node.step() else { continue };
        if step.has_side_effects() {
            continue;
        }
        let Some(params) = step.params() else { continue };
        let key: PeerKey = (
            step.name(),
            node.dependencies.iter().map(|d| plan.resolve(*d)).collect(),
            node.implicit_side_effect.map(|d| plan.resolve(d)),
            hash_serde(&params)?,
            step.source_identity(),
        );

        let bucket = peers.entry(key).or_default();
        let survivor = bucket.iter().copied().find(|peer| {
            plan.step(*peer)
                .ok()
                .and_then(|p| p.step())
                .and_then(|p| p.params())
                .is_some_and(|p| p == params)
        });
        match survivor {
            Some(survivor) => replacements.push((id, survivor)),
            None => bucket.push(id),
        }
    }

    for (id, survivor) in &replacements {
        plan.step_mut(*id)?.replaced_by = Some(*survivor);
        tracing::debug!(step = %id, survivor = %survivor, bucket = %layer, "deduplicated step");
    }
    Ok(replacements.len())
}

/// Point every step, copy, root and output reference at surviving steps.
fn rewrite_references(plan: &mut OperationPlan) {
    let targets: Vec<StepId> = plan.steps.iter().map(|s| plan.resolve(s.id)).collect();
    let resolve = |id: StepId| targets.get(id.index()).copied().unwrap_or(id);

    for node in plan.steps.iter_mut().filter(|s| s.is_live()) {
        for dep in node.dependencies.iter_mut() {
            *dep = resolve(*dep);
        }
        node.implicit_side_effect = node.implicit_side_effect.map(resolve);
    }

    for lp in plan.layer_plans.iter_mut() {
        let mut copied = Vec::with_capacity(lp.copied_step_ids.len());
        for id in lp.copied_step_ids.iter().map(|id| resolve(*id)) {
            if !copied.contains(&id) {
                copied.push(id);
            }
        }
        lp.copied_step_ids = copied;
        lp.root_step_id = lp.root_step_id.map(resolve);
        for entry in lp.output_map.values_mut() {
            entry.rewrite(&resolve);
        }
        if let Some(item) = lp.item_output.as_mut() {
            item.rewrite(&resolve);
        }
    }
}

//! The operation plan: arenas of steps and layer plans indexed by id.
//!
//! Built once per request by [`PlanBuilder`](crate::PlanBuilder); after the
//! builder hands it out it is only read (by the executor, `verify` and
//! `explain`). Deduplicated steps stay in the arena as tombstones whose
//! `replaced_by` points at the survivor, so ids handed out earlier remain
//! resolvable through [`OperationPlan::resolve`].

use std::collections::{BTreeSet, HashMap};

use batchplan_core::hash::{hash_serde, Hash256};
use batchplan_core::{LayerPlanId, StepId, Value};
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::layer::{LayerPlan, LayerReason};
use crate::step::{StepKind, StepNode};

#[derive(Debug, Clone)]
pub struct OperationPlan {
    pub(crate) steps: Vec<StepNode>,
    pub(crate) layer_plans: Vec<LayerPlan>,
    pub(crate) root_type: String,
    root_value_step: StepId,
    context_step: StepId,
}

/// Serializable view of one live step, for diagnostics and hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescription {
    pub id: StepId,
    pub name: String,
    pub meta: Option<String>,
    pub layer_plan: LayerPlanId,
    pub dependencies: Vec<StepId>,
    pub implicit_side_effect: Option<StepId>,
    pub is_sync_and_safe: bool,
    pub has_side_effects: bool,
    pub polymorphic_branches: BTreeSet<String>,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDescription {
    pub root_type: String,
    pub steps: Vec<StepDescription>,
    pub layer_plans: Vec<LayerPlan>,
}

impl OperationPlan {
    /// A plan holding only the root bucket and its two input steps.
    pub(crate) fn new(root_type: &str) -> Self {
        let root = LayerPlanId::new(0);
        let mut plan = Self {
            steps: Vec::new(),
            layer_plans: vec![LayerPlan::new(
                root,
                None,
                LayerReason::Root,
                None,
                BTreeSet::new(),
                String::new(),
            )],
            root_type: root_type.to_string(),
            root_value_step: StepId::new(0),
            context_step: StepId::new(1),
        };
        plan.root_value_step = plan.push_step(StepKind::RootValue, Vec::new(), None, root, "");
        plan.context_step = plan.push_step(StepKind::Context, Vec::new(), None, root, "");
        plan
    }

    pub(crate) fn push_step(
        &mut self,
        kind: StepKind,
        dependencies: Vec<StepId>,
        implicit_side_effect: Option<StepId>,
        layer_plan: LayerPlanId,
        path: &str,
    ) -> StepId {
        let id = StepId::new(self.steps.len() as u32);
        let polymorphic_branches = self.layer_plans[layer_plan.index()]
            .polymorphic_branches
            .clone();
        self.steps.push(StepNode {
            id,
            kind,
            dependencies,
            implicit_side_effect,
            layer_plan,
            polymorphic_branches,
            path: path.to_string(),
            replaced_by: None,
        });
        id
    }

    /// Open a child bucket under `parent` together with its entry step. The
    /// root step may be owned by `parent` or copied into it.
    pub(crate) fn push_layer(
        &mut self,
        parent: LayerPlanId,
        reason: LayerReason,
        root_step_id: StepId,
        path: &str,
    ) -> Result<LayerPlanId> {
        let parent_branches = self.layer_plan(parent)?.polymorphic_branches.clone();
        self.step(root_step_id)?;
        if !self.is_visible(root_step_id, parent) {
            return Err(PlanError::NotVisible {
                step: root_step_id,
                bucket: parent,
            });
        }
        let branches = match &reason {
            LayerReason::PolymorphicBranch { type_names } => {
                type_names.iter().cloned().collect()
            }
            _ => parent_branches,
        };
        let id = LayerPlanId::new(self.layer_plans.len() as u32);
        self.layer_plans.push(LayerPlan::new(
            id,
            Some(parent),
            reason,
            Some(root_step_id),
            branches,
            path.to_string(),
        ));
        self.layer_plans[parent.index()].children.push(id);
        let entry = self.push_step(StepKind::Entry, Vec::new(), None, id, path);
        self.layer_plans[id.index()].entry_step_id = Some(entry);
        Ok(id)
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    pub fn root_layer_plan(&self) -> &LayerPlan {
        &self.layer_plans[0]
    }

    pub fn root_value_step(&self) -> StepId {
        self.root_value_step
    }

    pub fn context_step(&self) -> StepId {
        self.context_step
    }

    pub fn step(&self, id: StepId) -> Result<&StepNode> {
        self.steps.get(id.index()).ok_or(PlanError::UnknownStep(id))
    }

    pub(crate) fn step_mut(&mut self, id: StepId) -> Result<&mut StepNode> {
        self.steps.get_mut(id.index()).ok_or(PlanError::UnknownStep(id))
    }

    pub fn layer_plan(&self, id: LayerPlanId) -> Result<&LayerPlan> {
        self.layer_plans
            .get(id.index())
            .ok_or(PlanError::UnknownBucket(id))
    }

    pub(crate) fn layer_plan_mut(&mut self, id: LayerPlanId) -> Result<&mut LayerPlan> {
        self.layer_plans
            .get_mut(id.index())
            .ok_or(PlanError::UnknownBucket(id))
    }

    /// Follow deduplication replacements to the surviving step.
    pub fn resolve(&self, mut id: StepId) -> StepId {
        while let Some(next) = self.steps.get(id.index()).and_then(|s| s.replaced_by) {
            id = next;
        }
        id
    }

    /// Live (non-deduplicated) steps in id order.
    pub fn steps(&self) -> impl Iterator<Item = &StepNode> {
        self.steps.iter().filter(|s| s.is_live())
    }

    /// Every step ever allocated, tombstones included.
    pub fn all_steps(&self) -> &[StepNode] {
        &self.steps
    }

    pub fn layer_plans(&self) -> &[LayerPlan] {
        &self.layer_plans
    }

    /// Live steps owned by `layer`, in id (construction) order.
    pub fn steps_in(&self, layer: LayerPlanId) -> impl Iterator<Item = &StepNode> {
        self.steps()
            .filter(move |s| s.layer_plan == layer)
    }

    /// Parent chain of `layer`, nearest first.
    pub fn ancestors(&self, layer: LayerPlanId) -> Vec<LayerPlanId> {
        let mut out = Vec::new();
        let mut cur = self.layer_plans.get(layer.index()).and_then(|l| l.parent);
        while let Some(id) = cur {
            out.push(id);
            cur = self.layer_plans.get(id.index()).and_then(|l| l.parent);
        }
        out
    }

    /// True when `ancestor` is a strict ancestor of `layer`.
    pub fn is_ancestor(&self, ancestor: LayerPlanId, layer: LayerPlanId) -> bool {
        self.ancestors(layer).contains(&ancestor)
    }

    /// A step is visible in a bucket when the bucket owns it or copied it in.
    pub fn is_visible(&self, step: StepId, layer: LayerPlanId) -> bool {
        match (self.steps.get(step.index()), self.layer_plans.get(layer.index())) {
            (Some(node), Some(lp)) => {
                node.layer_plan == layer || lp.copied_step_ids.contains(&step)
            }
            _ => false,
        }
    }

    /// Topological order of the live steps owned by `layer`, smallest id
    /// first among ready steps. Dependencies outside the bucket are already
    /// resolved by the time the bucket runs and impose no order here.
    pub fn dependency_order(&self, layer: LayerPlanId) -> Result<Vec<StepId>> {
        let owned: Vec<&StepNode> = self.steps_in(layer).collect();
        let mut pending: HashMap<StepId, usize> = HashMap::new();
        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();

        for node in &owned {
            let mut count = 0;
            for dep in node.ordering_dependencies() {
                let dep = self.resolve(dep);
                if self.step(dep)?.layer_plan == layer {
                    count += 1;
                    dependents.entry(dep).or_default().push(node.id);
                }
            }
            pending.insert(node.id, count);
        }

        let mut ready: BTreeSet<StepId> = pending
            .iter()
            .filter_map(|(id, &n)| (n == 0).then_some(*id))
            .collect();
        let mut order = Vec::with_capacity(owned.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            if let Some(nexts) = dependents.get(&id) {
                for next in nexts {
                    if let Some(n) = pending.get_mut(next) {
                        *n -= 1;
                        if *n == 0 {
                            ready.insert(*next);
                        }
                    }
                }
            }
        }

        if order.len() != owned.len() {
            let placed: BTreeSet<StepId> = order.iter().copied().collect();
            let steps = owned
                .iter()
                .map(|s| s.id)
                .filter(|id| !placed.contains(id))
                .collect();
            return Err(PlanError::Cycle {
                path: self.layer_plan(layer)?.path.clone(),
                steps,
            });
        }
        Ok(order)
    }

    /// Buckets in pre-order: every bucket after all of its ancestors.
    pub fn layer_plans_dependencies_first(&self) -> Vec<LayerPlanId> {
        let mut out = Vec::with_capacity(self.layer_plans.len());
        let mut stack = vec![LayerPlanId::new(0)];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(lp) = self.layer_plans.get(id.index()) {
                stack.extend(lp.children.iter().rev().copied());
            }
        }
        out
    }

    /// Visit every live step with all of its dependencies visited first.
    pub fn process_steps_dependencies_first(
        &self,
        mut f: impl FnMut(&StepNode),
    ) -> Result<()> {
        for layer in self.layer_plans_dependencies_first() {
            for id in self.dependency_order(layer)? {
                f(self.step(id)?);
            }
        }
        Ok(())
    }

    /// True if `layer` or any descendant owns a side-effect step.
    pub fn subtree_has_side_effects(&self, layer: LayerPlanId) -> bool {
        let mut stack = vec![layer];
        while let Some(id) = stack.pop() {
            if self.steps_in(id).any(StepNode::has_side_effects) {
                return true;
            }
            if let Some(lp) = self.layer_plans.get(id.index()) {
                stack.extend(lp.children.iter().copied());
            }
        }
        false
    }

    pub fn describe(&self) -> PlanDescription {
        PlanDescription {
            root_type: self.root_type.clone(),
            steps: self
                .steps()
                .map(|s| StepDescription {
                    id: s.id,
                    name: s.name().to_string(),
                    meta: s.meta(),
                    layer_plan: s.layer_plan,
                    dependencies: s.dependencies.clone(),
                    implicit_side_effect: s.implicit_side_effect,
                    is_sync_and_safe: s.is_sync_and_safe(),
                    has_side_effects: s.has_side_effects(),
                    polymorphic_branches: s.polymorphic_branches.clone(),
                    params: s.step().and_then(|st| st.params()),
                })
                .collect(),
            layer_plans: self.layer_plans.clone(),
        }
    }

    /// Stable hash of the finished plan's structure.
    pub fn fingerprint(&self) -> Result<Hash256> {
        Ok(hash_serde(&self.describe())?)
    }
}

//! PlanBuilder: request tree + field plan table → finished OperationPlan.
//!
//! Each bucket is planned in three phases:
//! 1. plan every selection that stays in the bucket (nested plain objects
//!    included), opening child buckets for list, polymorphic and deferred
//!    selections without planning their contents yet;
//! 2. deduplicate the bucket;
//! 3. plan the child buckets, which therefore only ever see survivor ids.
//!
//! The bucket being planned, the field path and the side-effect chain are
//! carried in an explicit [`Scope`] threaded through the recursion.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use batchplan_core::config::PlannerConfig;
use batchplan_core::{LayerPlanId, StepId, Value};
use indexmap::IndexMap;

use crate::dedupe;
use crate::error::{PlanError, Result};
use crate::layer::{LayerReason, OutputEntry, OutputMap, OutputMode};
use crate::plan::OperationPlan;
use crate::request::{FieldKind, RequestNode, RequestTree};
use crate::step::{Step, StepKind, StepNode};
use crate::steps::{AccessStep, ConstantStep, PolymorphicWrapStep};
use crate::verify;

/// Field arguments as given in the request.
pub type Arguments = IndexMap<String, Value>;

/// Field plan callback: `(context, parent step, arguments) -> step`.
pub type FieldPlanFn =
    dyn Fn(&mut FieldContext<'_>, StepId, &Arguments) -> Result<StepId> + Send + Sync;

/// Table of field plan callbacks keyed by `(type name, field name)`.
///
/// Fields without an entry read the attribute named after the field from
/// their parent value.
#[derive(Clone, Default)]
pub struct FieldPlans {
    plans: HashMap<(String, String), Arc<FieldPlanFn>>,
}

impl FieldPlans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: &str, field: &str, f: F) -> &mut Self
    where
        F: Fn(&mut FieldContext<'_>, StepId, &Arguments) -> Result<StepId> + Send + Sync + 'static,
    {
        self.plans
            .insert((type_name.to_string(), field.to_string()), Arc::new(f));
        self
    }

    pub fn get(&self, type_name: &str, field: &str) -> Option<&Arc<FieldPlanFn>> {
        self.plans.get(&(type_name.to_string(), field.to_string()))
    }
}

impl fmt::Debug for FieldPlans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .plans
            .keys()
            .map(|(t, field)| format!("{t}.{field}"))
            .collect();
        keys.sort();
        f.debug_struct("FieldPlans").field("fields", &keys).finish()
    }
}

/// Build state for the bucket currently being planned.
#[derive(Debug)]
pub(crate) struct Scope {
    layer: LayerPlanId,
    path: String,
    depth: usize,
    /// Type whose field is being planned.
    type_name: String,
    /// Latest side-effect step built in this bucket.
    side_effect: Option<StepId>,
}

/// What a field plan callback may do to the plan under construction.
pub struct FieldContext<'a> {
    plan: &'a mut OperationPlan,
    scope: &'a mut Scope,
}

impl<'a> FieldContext<'a> {
    /// Register a step in the current bucket. Every dependency must be owned
    /// by the bucket or copied into it.
    pub fn add_step<S: Step>(&mut self, step: S, dependencies: &[StepId]) -> Result<StepId> {
        self.add_shared_step(Arc::new(step), dependencies)
    }

    pub fn add_shared_step(
        &mut self,
        step: Arc<dyn Step>,
        dependencies: &[StepId],
    ) -> Result<StepId> {
        let layer = self.scope.layer;
        let mut deps = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            let dep = self.plan.resolve(*dep);
            if !self.plan.is_visible(dep, layer) {
                return Err(PlanError::NotVisible { step: dep, bucket: layer });
            }
            deps.push(dep);
        }
        let side_effects = step.has_side_effects();
        let name = step.name();
        let id = self.plan.push_step(
            StepKind::Executable(step),
            deps,
            self.scope.side_effect,
            layer,
            &self.scope.path,
        );
        if side_effects {
            self.scope.side_effect = Some(id);
        }
        tracing::trace!(step = %id, name, bucket = %layer, path = %self.scope.path, "added step");
        Ok(id)
    }

    /// Append a dependency to a step of the current bucket after the fact.
    /// Cycles introduced this way fail the build when the plan is finished.
    pub fn add_dependency(&mut self, step: StepId, dependency: StepId) -> Result<()> {
        let layer = self.scope.layer;
        let step = self.plan.resolve(step);
        let dependency = self.plan.resolve(dependency);
        if !self.plan.is_visible(dependency, layer) {
            return Err(PlanError::NotVisible {
                step: dependency,
                bucket: layer,
            });
        }
        let node = self.plan.step_mut(step)?;
        if node.layer_plan != layer || node.is_scheduler_filled() {
            return Err(PlanError::NotVisible { step, bucket: layer });
        }
        node.dependencies.push(dependency);
        Ok(())
    }

    /// Make an ancestor bucket's step visible here, copying it into every
    /// bucket between its owner and the current one.
    pub fn copy_in(&mut self, step: StepId) -> Result<StepId> {
        let layer = self.scope.layer;
        let step = self.plan.resolve(step);
        let owner = self.plan.step(step)?.layer_plan;
        if owner == layer {
            return Ok(step);
        }
        let chain = self.plan.ancestors(layer);
        let pos = chain
            .iter()
            .position(|id| *id == owner)
            .ok_or(PlanError::NotVisible { step, bucket: layer })?;
        for id in std::iter::once(layer).chain(chain[..pos].iter().copied()) {
            let lp = self.plan.layer_plan_mut(id)?;
            if !lp.copied_step_ids.contains(&step) {
                lp.copied_step_ids.push(step);
            }
        }
        Ok(step)
    }

    /// The request context step, copied into the current bucket.
    pub fn context(&mut self) -> Result<StepId> {
        let id = self.plan.context_step();
        self.copy_in(id)
    }

    /// The request root value step, copied into the current bucket.
    pub fn root_value(&mut self) -> Result<StepId> {
        let id = self.plan.root_value_step();
        self.copy_in(id)
    }

    pub fn step(&self, id: StepId) -> Result<&StepNode> {
        self.plan.step(self.plan.resolve(id))
    }

    pub fn bucket(&self) -> LayerPlanId {
        self.scope.layer
    }

    pub fn path(&self) -> &str {
        &self.scope.path
    }

    /// Type whose field is being planned.
    pub fn type_name(&self) -> &str {
        &self.scope.type_name
    }
}

/// Child bucket contents still to be planned.
enum Job<'r> {
    Root(&'r RequestTree),
    Item(&'r RequestNode),
    Branch(&'r RequestNode, String),
    Deferred(&'r RequestNode),
}

struct Pending<'r> {
    layer: LayerPlanId,
    depth: usize,
    job: Job<'r>,
}

pub struct PlanBuilder<'p> {
    plans: &'p FieldPlans,
    config: PlannerConfig,
}

impl<'p> PlanBuilder<'p> {
    pub fn new(plans: &'p FieldPlans, config: PlannerConfig) -> Self {
        Self { plans, config }
    }

    /// Build and verify the plan. Any failure aborts the whole build.
    pub fn build(&self, request: &RequestTree) -> Result<OperationPlan> {
        request.validate()?;
        let mut planner = Planner {
            plans: self.plans,
            config: &self.config,
            plan: OperationPlan::new(&request.root_type),
        };
        planner.plan_layer(Pending {
            layer: LayerPlanId::new(0),
            depth: 0,
            job: Job::Root(request),
        })?;
        let plan = planner.plan;
        verify::verify_plan(&plan)?;
        tracing::debug!(
            steps = plan.steps().count(),
            buckets = plan.layer_plans().len(),
            "operation plan finished"
        );
        Ok(plan)
    }
}

/// Convenience wrapper around [`PlanBuilder`].
pub fn build_plan(
    request: &RequestTree,
    plans: &FieldPlans,
    config: PlannerConfig,
) -> Result<OperationPlan> {
    PlanBuilder::new(plans, config).build(request)
}

struct Planner<'p> {
    plans: &'p FieldPlans,
    config: &'p PlannerConfig,
    plan: OperationPlan,
}

impl<'p> Planner<'p> {
    fn plan_layer<'r>(&mut self, job: Pending<'r>) -> Result<()> {
        let Pending { layer, depth, job } = job;
        let (path, entry) = {
            let lp = self.plan.layer_plan(layer)?;
            (lp.path.clone(), lp.entry_step_id)
        };
        tracing::debug!(bucket = %layer, path = %path, "planning bucket");

        let mut scope = Scope {
            layer,
            path,
            depth,
            type_name: String::new(),
            side_effect: None,
        };
        let mut pending = Vec::new();
        let entry_step = || entry.ok_or(PlanError::UnknownBucket(layer));

        match job {
            Job::Root(tree) => {
                let root = self.plan.root_value_step();
                let map = self.plan_selections(
                    &mut scope,
                    root,
                    &tree.root_type,
                    tree.selections.iter(),
                    &mut pending,
                )?;
                self.plan.layer_plan_mut(layer)?.output_map = map;
            }
            Job::Item(node) => {
                let item = self.plan_shape(
                    &mut scope,
                    entry_step()?,
                    node,
                    node.item_nullable,
                    &mut pending,
                )?;
                self.plan.layer_plan_mut(layer)?.item_output = Some(item);
            }
            Job::Branch(node, type_name) => {
                let map = self.plan_selections(
                    &mut scope,
                    entry_step()?,
                    &type_name,
                    node.selections_for(&type_name),
                    &mut pending,
                )?;
                self.plan.layer_plan_mut(layer)?.output_map = map;
            }
            Job::Deferred(node) => {
                let type_name = node.type_name.clone().unwrap_or_default();
                let map = self.plan_selections(
                    &mut scope,
                    entry_step()?,
                    &type_name,
                    node.selections.iter(),
                    &mut pending,
                )?;
                self.plan.layer_plan_mut(layer)?.output_map = map;
            }
        }

        if self.config.dedupe {
            dedupe::deduplicate_layer(&mut self.plan, layer)?;
        }

        for child in pending {
            self.plan_layer(child)?;
        }
        Ok(())
    }

    fn plan_selections<'r>(
        &mut self,
        scope: &mut Scope,
        parent: StepId,
        type_name: &str,
        selections: impl Iterator<Item = &'r RequestNode>,
        pending: &mut Vec<Pending<'r>>,
    ) -> Result<OutputMap> {
        let mut map = OutputMap::new();
        for node in selections {
            let entry = self.plan_field(scope, parent, type_name, node, pending)?;
            map.insert(node.response_key().to_string(), entry);
        }
        Ok(map)
    }

    fn plan_field<'r>(
        &mut self,
        scope: &mut Scope,
        parent: StepId,
        parent_type: &str,
        node: &'r RequestNode,
        pending: &mut Vec<Pending<'r>>,
    ) -> Result<OutputEntry> {
        let saved = scope.path.len();
        push_path(&mut scope.path, node.response_key());
        let out = self.plan_field_at(scope, parent, parent_type, node, pending);
        scope.path.truncate(saved);
        out
    }

    fn plan_field_at<'r>(
        &mut self,
        scope: &mut Scope,
        parent: StepId,
        parent_type: &str,
        node: &'r RequestNode,
        pending: &mut Vec<Pending<'r>>,
    ) -> Result<OutputEntry> {
        if scope.depth >= self.config.max_depth {
            return Err(PlanError::DepthExceeded {
                path: scope.path.clone(),
                limit: self.config.max_depth,
            });
        }

        let step = self.invoke(scope, parent, parent_type, node)?;

        if node.list {
            let path = format!("{}[]", scope.path);
            let child = self
                .plan
                .push_layer(scope.layer, LayerReason::ListItem, step, &path)?;
            pending.push(Pending {
                layer: child,
                depth: scope.depth + 1,
                job: Job::Item(node),
            });
            return Ok(OutputEntry {
                step,
                mode: OutputMode::List(child),
                nullable: node.nullable,
            });
        }
        self.plan_shape(scope, step, node, node.nullable, pending)
    }

    /// Output entry for a single (non-list) value of `node`'s type produced
    /// by `step`.
    fn plan_shape<'r>(
        &mut self,
        scope: &mut Scope,
        step: StepId,
        node: &'r RequestNode,
        nullable: bool,
        pending: &mut Vec<Pending<'r>>,
    ) -> Result<OutputEntry> {
        let mode = match node.kind {
            FieldKind::Scalar => OutputMode::Scalar,
            FieldKind::Object if node.deferred => {
                let child =
                    self.plan
                        .push_layer(scope.layer, LayerReason::Subroutine, step, &scope.path)?;
                pending.push(Pending {
                    layer: child,
                    depth: scope.depth + 1,
                    job: Job::Deferred(node),
                });
                OutputMode::Deferred(child)
            }
            FieldKind::Object => {
                let type_name = node.type_name.clone().unwrap_or_default();
                scope.depth += 1;
                let fields = self.plan_selections(
                    scope,
                    step,
                    &type_name,
                    node.selections.iter(),
                    pending,
                );
                scope.depth -= 1;
                OutputMode::Object(fields?)
            }
            FieldKind::Polymorphic => {
                let mut branches = Vec::with_capacity(node.possible_types.len());
                for type_name in &node.possible_types {
                    let child = self.plan.push_layer(
                        scope.layer,
                        LayerReason::PolymorphicBranch {
                            type_names: vec![type_name.clone()],
                        },
                        step,
                        &format!("{}<{}>", scope.path, type_name),
                    )?;
                    pending.push(Pending {
                        layer: child,
                        depth: scope.depth + 1,
                        job: Job::Branch(node, type_name.clone()),
                    });
                    branches.push(child);
                }
                OutputMode::Polymorphic(branches)
            }
        };
        Ok(OutputEntry {
            step,
            mode,
            nullable,
        })
    }

    /// Run the field's plan callback (or the default plan) and check that the
    /// returned step is usable from the current bucket.
    fn invoke(
        &mut self,
        scope: &mut Scope,
        parent: StepId,
        parent_type: &str,
        node: &RequestNode,
    ) -> Result<StepId> {
        let plans = self.plans;
        scope.type_name = parent_type.to_string();
        let layer = scope.layer;
        let path = scope.path.clone();
        let mut ctx = FieldContext {
            plan: &mut self.plan,
            scope,
        };

        let result = if node.field == "__typename" {
            ctx.add_step(ConstantStep::new(parent_type), &[])
        } else {
            match plans.get(parent_type, &node.field) {
                Some(f) => (**f)(&mut ctx, parent, &node.arguments),
                None => default_field_plan(&mut ctx, parent, node),
            }
        };

        let step = result.map_err(|e| e.at_field(&path))?;
        let step = self.plan.resolve(step);
        if !self.plan.is_visible(step, layer) {
            return Err(PlanError::NotVisible { step, bucket: layer }.at_field(&path));
        }
        Ok(step)
    }
}

fn default_field_plan(
    ctx: &mut FieldContext<'_>,
    parent: StepId,
    node: &RequestNode,
) -> Result<StepId> {
    let access = ctx.add_step(AccessStep::new(node.field.as_str()), &[parent])?;
    match node.kind {
        FieldKind::Polymorphic => ctx.add_step(PolymorphicWrapStep::default(), &[access]),
        _ => Ok(access),
    }
}

fn push_path(path: &mut String, key: &str) {
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(key);
}

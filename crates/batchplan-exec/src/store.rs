//! Row-context storage for one bucket run.
//!
//! A store holds one column per visible step (owned, copied or scheduler
//! filled) with one cell per row-context. It is written only by the bucket
//! run that created it; once published, children read it through an `Arc`
//! and copy the cells they need.

use std::collections::HashMap;
use std::sync::Arc;

use batchplan_core::{LayerPlanId, StepId, Value};
use batchplan_planner::{LayerPlan, LayerReason, OperationPlan};

use crate::runtime::ExecutionInput;

/// Message of a failed cell or bucket.
pub type Failure = Arc<str>;

/// One step's outcome for one row-context.
pub type Cell = Result<Value, Failure>;

#[derive(Debug)]
pub struct BucketStore {
    layer: LayerPlanId,
    size: usize,
    /// Parent store row each row derives from.
    parent_rows: Vec<usize>,
    /// Position in the parent's list (list item buckets only).
    item_index: Vec<Option<usize>>,
    by_parent: HashMap<usize, Vec<usize>>,
    columns: HashMap<StepId, Vec<Cell>>,
    failure: Option<Failure>,
}

impl BucketStore {
    fn empty(layer: LayerPlanId) -> Self {
        Self {
            layer,
            size: 0,
            parent_rows: Vec::new(),
            item_index: Vec::new(),
            by_parent: HashMap::new(),
            columns: HashMap::new(),
            failure: None,
        }
    }

    /// The root bucket: a single row holding the request's root value and
    /// context.
    pub(crate) fn root(plan: &OperationPlan, input: &ExecutionInput) -> Self {
        let mut store = Self::empty(plan.root_layer_plan().id);
        store.size = 1;
        store.parent_rows.push(0);
        store.item_index.push(None);
        store.by_parent.insert(0, vec![0]);
        store
            .columns
            .insert(plan.root_value_step(), vec![Ok(input.root_value.clone())]);
        store
            .columns
            .insert(plan.context_step(), vec![Ok(input.context.clone())]);
        store
    }

    /// A bucket that did not run; every read of it reports `message`.
    pub(crate) fn failed(layer: LayerPlanId, message: impl Into<Failure>) -> Self {
        let mut store = Self::empty(layer);
        store.failure = Some(message.into());
        store
    }

    /// Admit rows of `parent` into the child bucket `lp` and take snapshots
    /// of its copied steps.
    ///
    /// Every copied step must be present in the parent store at entry;
    /// otherwise the whole bucket fails.
    pub(crate) fn enter(lp: &LayerPlan, parent: &BucketStore) -> Result<Self, Failure> {
        crate::fail_point!("bucket_entry");
        if let Some(failure) = &parent.failure {
            return Err(failure.clone());
        }
        let root = lp
            .root_step_id
            .ok_or_else(|| Failure::from(format!("{} has no root step", lp.id)))?;
        let entry = lp
            .entry_step_id
            .ok_or_else(|| Failure::from(format!("{} has no entry step", lp.id)))?;
        let roots = parent.column(root).ok_or_else(|| {
            Failure::from(format!("{root} is not available in {}", parent.layer))
        })?;

        let mut store = Self::empty(lp.id);
        let mut entries = Vec::new();
        for (parent_row, cell) in roots.iter().enumerate() {
            let Ok(value) = cell else { continue };
            match (&lp.reason, value) {
                (LayerReason::ListItem, Value::List(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        store.admit(parent_row, Some(i));
                        entries.push(Ok(item.clone()));
                    }
                }
                (LayerReason::PolymorphicBranch { .. }, Value::Polymorphic(marker))
                    if lp.reason.admits(marker.concrete_type()) =>
                {
                    store.admit(parent_row, None);
                    entries.push(Ok(marker.data().clone()));
                }
                (LayerReason::Subroutine, v) if !v.is_null() => {
                    store.admit(parent_row, None);
                    entries.push(Ok(v.clone()));
                }
                _ => {}
            }
        }
        store.columns.insert(entry, entries);

        for copied in &lp.copied_step_ids {
            let source = parent.column(*copied).ok_or_else(|| {
                Failure::from(format!(
                    "copied step {copied} is not available in {}",
                    parent.layer
                ))
            })?;
            let column = store
                .parent_rows
                .iter()
                .map(|r| {
                    source
                        .get(*r)
                        .cloned()
                        .unwrap_or_else(|| Err(Failure::from("copied row out of range")))
                })
                .collect();
            store.columns.insert(*copied, column);
        }
        Ok(store)
    }

    fn admit(&mut self, parent_row: usize, item_index: Option<usize>) {
        let row = self.size;
        self.size += 1;
        self.parent_rows.push(parent_row);
        self.item_index.push(item_index);
        self.by_parent.entry(parent_row).or_default().push(row);
    }

    pub fn layer(&self) -> LayerPlanId {
        self.layer
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn column(&self, step: StepId) -> Option<&[Cell]> {
        self.columns.get(&step).map(Vec::as_slice)
    }

    pub fn cell(&self, step: StepId, row: usize) -> Option<&Cell> {
        self.columns.get(&step).and_then(|c| c.get(row))
    }

    /// Rows admitted from `parent_row`, in admission (item) order.
    pub fn rows_for(&self, parent_row: usize) -> &[usize] {
        self.by_parent
            .get(&parent_row)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn parent_row(&self, row: usize) -> Option<usize> {
        self.parent_rows.get(row).copied()
    }

    pub fn item_index(&self, row: usize) -> Option<usize> {
        self.item_index.get(row).copied().flatten()
    }

    pub(crate) fn insert(&mut self, step: StepId, cells: Vec<Cell>) {
        self.columns.insert(step, cells);
    }

    /// Mark every row of `step` as failed with `message`.
    pub(crate) fn fail_column(&mut self, step: StepId, message: &Failure) {
        self.columns
            .insert(step, vec![Err(message.clone()); self.size]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchplan_core::config::PlannerConfig;
    use batchplan_core::polymorphic_wrap;
    use batchplan_planner::{build_plan, FieldPlans, RequestNode, RequestTree};

    fn plan_for(node: RequestNode) -> OperationPlan {
        let request = RequestTree::new("Query", vec![node]);
        build_plan(&request, &FieldPlans::new(), PlannerConfig::default()).unwrap()
    }

    fn parent_with(plan: &OperationPlan, cells: Vec<Cell>) -> BucketStore {
        let root = plan.root_layer_plan();
        let mut parent = BucketStore::empty(root.id);
        for r in 0..cells.len() {
            parent.admit(r, None);
        }
        let step = root.output_map[0].step;
        parent.insert(step, cells);
        parent
    }

    #[test]
    fn list_items_expand_per_parent_row() {
        let plan = plan_for(RequestNode::scalar("tags").list());
        let parent = parent_with(
            &plan,
            vec![
                Ok(Value::from(vec![Value::from("a"), Value::from("b")])),
                Ok(Value::List(Vec::new())),
                Ok(Value::Null),
                Ok(Value::from(vec![Value::from("c")])),
            ],
        );
        let child = BucketStore::enter(&plan.layer_plans()[1], &parent).unwrap();
        assert_eq!(child.len(), 3);
        assert_eq!(child.rows_for(0), &[0, 1]);
        assert!(child.rows_for(1).is_empty());
        assert_eq!(child.rows_for(3), &[2]);
        assert_eq!(child.item_index(1), Some(1));
        assert_eq!(child.parent_row(2), Some(3));
    }

    #[test]
    fn branches_admit_matching_markers_only() {
        let plan = plan_for(RequestNode::polymorphic("pet", "Pet", &["Dog", "Cat"]));
        let dog = polymorphic_wrap("Dog", Value::from("rex")).unwrap();
        let cat = polymorphic_wrap("Cat", Value::from("tom")).unwrap();
        let parent = parent_with(&plan, vec![Ok(dog), Ok(cat), Ok(Value::from("plain"))]);

        let dogs = BucketStore::enter(&plan.layer_plans()[1], &parent).unwrap();
        let cats = BucketStore::enter(&plan.layer_plans()[2], &parent).unwrap();
        assert_eq!(dogs.len(), 1);
        assert_eq!(dogs.rows_for(0), &[0]);
        assert_eq!(cats.len(), 1);
        assert_eq!(cats.rows_for(1), &[0]);
        let entry = plan.layer_plans()[2].entry_step_id.unwrap();
        assert_eq!(cats.cell(entry, 0), Some(&Ok(Value::from("tom"))));
    }

    #[test]
    fn missing_copy_fails_the_bucket() {
        let plan = plan_for(RequestNode::scalar("tags").list());
        let mut lp = plan.layer_plans()[1].clone();
        lp.copied_step_ids.push(StepId::new(99));
        let parent = parent_with(&plan, vec![Ok(Value::from(vec![Value::from(1)]))]);
        let err = BucketStore::enter(&lp, &parent).unwrap_err();
        assert!(err.contains("#99"));
    }
}

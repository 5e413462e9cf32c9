//! Step trait + the arena node the planner wraps every step in.
//!
//! The executor calls [`Step::execute`] once per bucket run with the values
//! of the step's dependencies for every admitted row-context, and expects
//! one outcome per row back.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use batchplan_core::{LayerPlanId, StepId, Value};

use crate::error::StepError;

/// Outcome for one row-context.
pub type RowResult = std::result::Result<Value, StepError>;

/// Dependency values for a batch of row-contexts.
///
/// `values[d][r]` is the value of dependency `d` (positional, in declared
/// order) for row `r`.
#[derive(Debug, Clone, Default)]
pub struct StepBatch {
    size: usize,
    values: Vec<Vec<Value>>,
}

impl StepBatch {
    pub fn new(size: usize, values: Vec<Vec<Value>>) -> Self {
        debug_assert!(values.iter().all(|column| column.len() == size));
        Self { size, values }
    }

    /// Number of row-contexts in the batch.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// All rows' values of the dependency at `index`.
    pub fn dependency(&self, index: usize) -> &[Value] {
        self.values.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// One row's dependency values, in declared order.
    pub fn row(&self, row: usize) -> Vec<&Value> {
        self.values.iter().map(|column| &column[row]).collect()
    }
}

/// Trait that all executable steps implement.
///
/// Invariants:
/// - `execute` returns exactly `batch.len()` outcomes, in row order.
/// - Dependency values are read-only; a step never mutates its inputs.
/// - A step whose `is_sync_and_safe` is true must complete without awaiting.
#[async_trait]
pub trait Step: Send + Sync + fmt::Debug + 'static {
    /// Stable step type name; part of the step's structural identity.
    fn name(&self) -> &'static str;

    /// Construction parameters compared (deep equality) during deduplication.
    /// `None` opts the step out of deduplication.
    fn params(&self) -> Option<Value> {
        None
    }

    /// Identity of the resource the step reads through, when two steps with
    /// equal `params` may still read different resources. Steps with different
    /// identities are never merged. Not part of the plan fingerprint.
    fn source_identity(&self) -> Option<usize> {
        None
    }

    fn is_sync_and_safe(&self) -> bool {
        true
    }

    fn has_side_effects(&self) -> bool {
        false
    }

    /// Short description for plan diagrams.
    fn meta(&self) -> Option<String> {
        None
    }

    async fn execute(&self, batch: StepBatch) -> std::result::Result<Vec<RowResult>, StepError>;
}

/// What a step node stands for.
#[derive(Debug, Clone)]
pub enum StepKind {
    /// The request's root value; filled by the scheduler for the root bucket.
    RootValue,
    /// The request context; filled by the scheduler for the root bucket.
    Context,
    /// A bucket's entry value (list item, branch payload or deferred value),
    /// filled by the scheduler when rows are admitted into the bucket.
    Entry,
    Executable(Arc<dyn Step>),
}

/// A step as it lives in the operation plan arena.
#[derive(Debug, Clone)]
pub struct StepNode {
    pub id: StepId,
    pub kind: StepKind,
    /// Positional dependencies, consumed by the step's own evaluation.
    pub dependencies: Vec<StepId>,
    /// Latest side-effect step built before this one in the same bucket;
    /// an ordering dependency only, never passed to `execute`.
    pub implicit_side_effect: Option<StepId>,
    pub layer_plan: LayerPlanId,
    /// Variants under which this step is valid; empty means unconditionally.
    pub polymorphic_branches: BTreeSet<String>,
    /// Field path that created the step.
    pub path: String,
    /// Set when deduplication merged this step into a survivor.
    pub replaced_by: Option<StepId>,
}

impl StepNode {
    pub fn name(&self) -> &'static str {
        match &self.kind {
            StepKind::RootValue => "__Value",
            StepKind::Context => "__Context",
            StepKind::Entry => "__Item",
            StepKind::Executable(step) => step.name(),
        }
    }

    pub fn step(&self) -> Option<&Arc<dyn Step>> {
        match &self.kind {
            StepKind::Executable(step) => Some(step),
            _ => None,
        }
    }

    pub fn meta(&self) -> Option<String> {
        self.step().and_then(|s| s.meta())
    }

    /// Side-effect steps are never treated as sync and safe.
    pub fn is_sync_and_safe(&self) -> bool {
        match &self.kind {
            StepKind::Executable(step) => step.is_sync_and_safe() && !step.has_side_effects(),
            _ => true,
        }
    }

    pub fn has_side_effects(&self) -> bool {
        self.step().map(|s| s.has_side_effects()).unwrap_or(false)
    }

    pub fn is_live(&self) -> bool {
        self.replaced_by.is_none()
    }

    /// Values supplied by the scheduler rather than computed by `execute`.
    pub fn is_scheduler_filled(&self) -> bool {
        !matches!(self.kind, StepKind::Executable(_))
    }

    /// Positional dependencies plus the implicit side-effect dependency.
    pub fn ordering_dependencies(&self) -> impl Iterator<Item = StepId> + '_ {
        self.dependencies
            .iter()
            .copied()
            .chain(self.implicit_side_effect)
    }
}

//! Layer plans ("buckets"): the scheduling partitions of an operation plan.

use std::collections::BTreeSet;

use batchplan_core::{LayerPlanId, StepId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Why a bucket exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LayerReason {
    Root,
    /// One row-context per item of the list produced by the root step.
    ListItem,
    /// Admits rows whose polymorphic marker names one of `type_names`.
    PolymorphicBranch { type_names: Vec<String> },
    /// Deferred sub-plan, run after its non-deferred siblings.
    Subroutine,
}

impl LayerReason {
    pub fn label(&self) -> String {
        match self {
            LayerReason::Root => "root".to_string(),
            LayerReason::ListItem => "listItem".to_string(),
            LayerReason::PolymorphicBranch { type_names } => {
                format!("polymorphic({})", type_names.join(","))
            }
            LayerReason::Subroutine => "subroutine".to_string(),
        }
    }

    pub fn admits(&self, type_name: &str) -> bool {
        match self {
            LayerReason::PolymorphicBranch { type_names } => {
                type_names.iter().any(|t| t == type_name)
            }
            _ => true,
        }
    }
}

/// How the result assembler reads a step's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "of", rename_all = "camelCase")]
pub enum OutputMode {
    /// The value as produced.
    Scalar,
    /// Nested fields planned in the same bucket.
    Object(OutputMap),
    /// Items come from the `ListItem` child bucket's `item_output`.
    List(LayerPlanId),
    /// The single admitting branch bucket supplies the object.
    Polymorphic(Vec<LayerPlanId>),
    /// The `Subroutine` child bucket supplies the object.
    Deferred(LayerPlanId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub step: StepId,
    pub mode: OutputMode,
    pub nullable: bool,
}

impl OutputEntry {
    pub fn scalar(step: StepId, nullable: bool) -> Self {
        Self {
            step,
            mode: OutputMode::Scalar,
            nullable,
        }
    }

    /// Apply `f` to every step id referenced by this entry, recursively.
    pub fn rewrite(&mut self, f: &impl Fn(StepId) -> StepId) {
        self.step = f(self.step);
        if let OutputMode::Object(fields) = &mut self.mode {
            for entry in fields.values_mut() {
                entry.rewrite(f);
            }
        }
    }

    /// Step ids referenced by this entry, recursively.
    pub fn step_ids(&self, out: &mut Vec<StepId>) {
        out.push(self.step);
        if let OutputMode::Object(fields) = &self.mode {
            for entry in fields.values() {
                entry.step_ids(out);
            }
        }
    }
}

/// Response key → how to produce it. Ordered like the request.
pub type OutputMap = IndexMap<String, OutputEntry>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerPlan {
    pub id: LayerPlanId,
    pub parent: Option<LayerPlanId>,
    pub children: Vec<LayerPlanId>,
    pub reason: LayerReason,
    /// Ancestor steps made available to this bucket's steps by reference.
    pub copied_step_ids: Vec<StepId>,
    /// Step in the parent bucket this bucket's rows derive from.
    pub root_step_id: Option<StepId>,
    /// Step owned by this bucket holding each row's entry value.
    pub entry_step_id: Option<StepId>,
    pub output_map: OutputMap,
    /// Shape of each item row (`ListItem` buckets only).
    pub item_output: Option<OutputEntry>,
    /// Variants this bucket's steps are valid under; empty means unconditionally.
    pub polymorphic_branches: BTreeSet<String>,
    /// Field path that opened the bucket.
    pub path: String,
}

impl LayerPlan {
    pub(crate) fn new(
        id: LayerPlanId,
        parent: Option<LayerPlanId>,
        reason: LayerReason,
        root_step_id: Option<StepId>,
        polymorphic_branches: BTreeSet<String>,
        path: String,
    ) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            reason,
            copied_step_ids: Vec::new(),
            root_step_id,
            entry_step_id: None,
            output_map: OutputMap::new(),
            item_output: None,
            polymorphic_branches,
            path,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.reason, LayerReason::Subroutine)
    }

    /// Every step id this bucket references through its output shape.
    pub fn output_step_ids(&self) -> Vec<StepId> {
        let mut out = Vec::new();
        for entry in self.output_map.values() {
            entry.step_ids(&mut out);
        }
        if let Some(item) = &self.item_output {
            item.step_ids(&mut out);
        }
        out
    }
}

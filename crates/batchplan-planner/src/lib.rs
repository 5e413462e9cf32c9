#![forbid(unsafe_code)]
//! batchplan-planner: request tree → deduplicated step graph partitioned
//! into buckets (layer plans).
//!
//! Design:
//! - Steps and layer plans live in arenas inside [`OperationPlan`] and refer
//!   to each other by integer id only.
//! - [`PlanBuilder`] walks the request tree, invoking field plan callbacks
//!   from a [`FieldPlans`] table, and opens a child bucket for every list,
//!   polymorphic or deferred selection.
//! - [`dedupe`] merges structurally identical steps per bucket before the
//!   bucket's children are planned.
//! - [`verify`] and [`explain`] only read the finished plan.
//!
//! NOTE: no execution here; `batchplan-exec` is the only component that runs steps.

pub mod builder;
pub mod dedupe;
pub mod dsl;
pub mod error;
pub mod explain;
pub mod layer;
pub mod plan;
pub mod request;
pub mod step;
pub mod steps;
pub mod verify;

pub use builder::{build_plan, Arguments, FieldContext, FieldPlans, PlanBuilder};
pub use dsl::yaml::{parse_yaml_request, DocConfig, RequestDocument};
pub use explain::{print_plan_graph, PrintOptions};
pub use error::{PlanError, Result, StepError};
pub use dedupe::deduplicate;
pub use verify::verify_plan;
pub use layer::{LayerPlan, LayerReason, OutputEntry, OutputMap, OutputMode};
pub use plan::{OperationPlan, PlanDescription, StepDescription};
pub use request::{FieldKind, Fragment, RequestNode, RequestTree};
pub use step::{RowResult, Step, StepBatch, StepKind, StepNode};

#![forbid(unsafe_code)]
//! batchplan-core: shared vocabulary for the planner and the executor.
//!
//! - Strongly-typed ids for steps and layer plans (buckets).
//! - The runtime [`Value`](value::Value) that flows between steps, including
//!   the polymorphic marker used to select type-conditional buckets.
//! - Planner/executor configuration, stable hashing and the run manifest.
//!
//! **No I/O, no async** here.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod polymorphic;
pub mod prelude;
pub mod value;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{Error, Result};
pub use id::{LayerPlanId, StepId};
pub use polymorphic::{is_polymorphic, polymorphic_wrap, resolve_type, PolymorphicMarker};
pub use value::Value;

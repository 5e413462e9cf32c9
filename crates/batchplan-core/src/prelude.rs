//! Convenient re-exports for downstream crates.

pub use crate::config::{ExecConfig, PlannerConfig};
pub use crate::error::{Error, Result};
pub use crate::hash::{hash_serde, Hash256};
pub use crate::id::{LayerPlanId, StepId};
pub use crate::manifest::RunManifest;
pub use crate::polymorphic::{is_polymorphic, polymorphic_wrap, resolve_type, PolymorphicMarker};
pub use crate::value::{Object, Value};

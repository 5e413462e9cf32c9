//! Strongly-typed identifiers used across the planner and executor.
//!
//! Downstream crates should *not* use raw integers for ids. Both ids are
//! arena indices: they are handed out densely from zero and never reused.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident, $short:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(v: u32) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u32 {
                self.0
            }
            /// Position of this id in its owning arena.
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $short, self.0)
            }
        }
    };
}

new_id!(StepId, "#");
new_id!(LayerPlanId, "Bucket");

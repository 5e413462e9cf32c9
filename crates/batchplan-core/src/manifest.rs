//! Run manifest: what one execution of an operation plan did.
//!
//! The executor emits a manifest with every result. Tests use the per-step
//! call counts to check batching (one call per step per bucket run) and the
//! per-bucket row counts to check list/polymorphic fan-out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;
use crate::id::{LayerPlanId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: ManifestId,

    /// Stable hash of the finished operation plan.
    pub plan_hash: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Row-contexts created per executed bucket. Buckets that were never
    /// entered are absent.
    pub bucket_rows: BTreeMap<LayerPlanId, usize>,

    /// Batch calls issued per step.
    pub step_calls: BTreeMap<StepId, u64>,

    /// Side-effect steps in the order they were invoked.
    pub side_effect_order: Vec<StepId>,

    pub cancelled: bool,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(plan_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            plan_hash,
            engine_version: crate::VERSION.to_string(),
            bucket_rows: BTreeMap::new(),
            step_calls: BTreeMap::new(),
            side_effect_order: Vec::new(),
            cancelled: false,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn calls(&self, step: StepId) -> u64 {
        self.step_calls.get(&step).copied().unwrap_or(0)
    }

    pub fn rows(&self, bucket: LayerPlanId) -> Option<usize> {
        self.bucket_rows.get(&bucket).copied()
    }

    pub fn finish(mut self, finished_ms: u64) -> Self {
        self.finished_ms = finished_ms;
        self
    }
}

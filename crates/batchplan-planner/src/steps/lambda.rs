use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use batchplan_core::Value;

use crate::error::StepError;
use crate::step::{RowResult, Step, StepBatch};

type RowFn = dyn Fn(&[&Value]) -> RowResult + Send + Sync;

/// Applies a closure to each row's dependency values.
///
/// Closures have no structural identity, so lambda steps are never merged by
/// deduplication.
#[derive(Clone)]
pub struct LambdaStep {
    label: String,
    f: Arc<RowFn>,
    sync: bool,
    side_effects: bool,
}

impl LambdaStep {
    pub fn new(
        label: impl Into<String>,
        f: impl Fn(&[&Value]) -> RowResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            f: Arc::new(f),
            sync: true,
            side_effects: false,
        }
    }

    /// Mark the step as an asynchronous suspension point.
    pub fn suspending(mut self) -> Self {
        self.sync = false;
        self
    }

    /// Mark the step as having side effects (e.g. a write).
    pub fn with_side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }
}

impl fmt::Debug for LambdaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaStep")
            .field("label", &self.label)
            .field("sync", &self.sync)
            .field("side_effects", &self.side_effects)
            .finish()
    }
}

#[async_trait]
impl Step for LambdaStep {
    fn name(&self) -> &'static str {
        "Lambda"
    }

    fn is_sync_and_safe(&self) -> bool {
        self.sync && !self.side_effects
    }

    fn has_side_effects(&self) -> bool {
        self.side_effects
    }

    fn meta(&self) -> Option<String> {
        Some(self.label.clone())
    }

    async fn execute(&self, batch: StepBatch) -> Result<Vec<RowResult>, StepError> {
        Ok((0..batch.len())
            .map(|r| (self.f)(&batch.row(r)))
            .collect())
    }
}

use async_trait::async_trait;
use batchplan_core::Value;

use crate::error::StepError;
use crate::step::{RowResult, Step, StepBatch};

/// Produces the same value for every row.
#[derive(Debug, Clone)]
pub struct ConstantStep {
    value: Value,
}

impl ConstantStep {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl Step for ConstantStep {
    fn name(&self) -> &'static str {
        "Constant"
    }

    fn params(&self) -> Option<Value> {
        Some(self.value.clone())
    }

    fn meta(&self) -> Option<String> {
        Some(self.value.to_string())
    }

    async fn execute(&self, batch: StepBatch) -> Result<Vec<RowResult>, StepError> {
        Ok(vec![Ok(self.value.clone()); batch.len()])
    }
}

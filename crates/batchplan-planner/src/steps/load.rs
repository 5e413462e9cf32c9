use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use batchplan_core::Value;

use crate::error::StepError;
use crate::step::{RowResult, Step, StepBatch};

/// A data source that resolves many keys in one call.
///
/// Implementations return one outcome per key, in key order. Returning `Err`
/// from `load` fails the whole batch.
#[async_trait]
pub trait BatchLoader: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn load(&self, keys: Vec<Value>) -> Result<Vec<RowResult>, StepError>;
}

/// Loads one record per row, keyed by its single dependency, with a single
/// loader call per batch.
#[derive(Clone)]
pub struct LoadStep {
    loader: Arc<dyn BatchLoader>,
}

impl LoadStep {
    pub fn new(loader: Arc<dyn BatchLoader>) -> Self {
        Self { loader }
    }
}

impl fmt::Debug for LoadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadStep")
            .field("loader", &self.loader.name())
            .finish()
    }
}

#[async_trait]
impl Step for LoadStep {
    fn name(&self) -> &'static str {
        "Load"
    }

    /// Two loads of the same key through the same loader are the same load.
    fn params(&self) -> Option<Value> {
        Some(Value::from(self.loader.name()))
    }

    /// Loaders sharing a name are still distinct sources.
    fn source_identity(&self) -> Option<usize> {
        Some(Arc::as_ptr(&self.loader) as *const () as usize)
    }

    fn is_sync_and_safe(&self) -> bool {
        false
    }

    fn meta(&self) -> Option<String> {
        Some(self.loader.name().to_string())
    }

    async fn execute(&self, batch: StepBatch) -> Result<Vec<RowResult>, StepError> {
        let keys = batch.dependency(0).to_vec();
        let n = keys.len();
        let out = self.loader.load(keys).await?;
        if out.len() != n {
            return Err(StepError::Failed(format!(
                "loader '{}' returned {} results for {} keys",
                self.loader.name(),
                out.len(),
                n
            )));
        }
        Ok(out)
    }
}

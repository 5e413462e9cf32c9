//! Runtime: run a finished OperationPlan and return data, errors and a
//! RunManifest.
//!
//! - The root bucket is seeded with one row holding the input's root value
//!   and context, then the bucket tree is walked by the scheduler.
//! - A configured request timeout cancels the run from a timer task; an
//!   externally supplied token can cancel it as well.
//! - Results are assembled only after every reachable bucket has finished.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use batchplan_core::config::ExecConfig;
use batchplan_core::manifest::RunManifest;
use batchplan_core::Value;
use batchplan_planner::{OperationPlan, PlanError};

use crate::output::{assemble, ExecutionResult};
use crate::scheduler::Run;
use crate::store::BucketStore;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid plan: {0}")]
    Invariant(String),
    #[error("hashing error: {0}")]
    Hash(String),
}

impl From<PlanError> for ExecError {
    fn from(e: PlanError) -> Self {
        ExecError::Invariant(e.to_string())
    }
}

/// Live values the plan runs against.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInput {
    pub root_value: Value,
    pub context: Value,
}

impl ExecutionInput {
    pub fn new(root_value: impl Into<Value>) -> Self {
        Self {
            root_value: root_value.into(),
            context: Value::Null,
        }
    }

    pub fn with_context(mut self, context: impl Into<Value>) -> Self {
        self.context = context.into();
        self
    }
}

/// Executor owns the execution config; plans and inputs are supplied per run.
#[derive(Debug, Clone)]
pub struct Executor {
    cfg: ExecConfig,
}

impl Executor {
    pub fn new(cfg: ExecConfig) -> Result<Self, ExecError> {
        cfg.validate().map_err(|e| ExecError::Config(e.to_string()))?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &ExecConfig {
        &self.cfg
    }

    pub async fn execute(
        &self,
        plan: &OperationPlan,
        input: ExecutionInput,
    ) -> Result<ExecutionResult, ExecError> {
        self.execute_with_cancel(plan, input, CancellationToken::new())
            .await
    }

    /// Run `plan`, stopping early when `cancel` fires. Buckets and waves not
    /// yet started when cancellation is observed resolve as errors; batch
    /// calls already in flight complete.
    pub async fn execute_with_cancel(
        &self,
        plan: &OperationPlan,
        input: ExecutionInput,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecError> {
        let plan_hash = plan
            .fingerprint()
            .map_err(|e| ExecError::Hash(e.to_string()))?;
        let manifest = RunManifest::new(plan_hash, now_millis());

        let token = cancel.child_token();
        let timer = self.cfg.request_timeout_ms.map(|ms| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                tracing::warn!(timeout_ms = ms, "request timed out; cancelling");
                token.cancel();
            })
        });

        let run = Run::new(plan, &self.cfg, token, manifest);
        let root = BucketStore::root(plan, &input);
        let outcome = run.run_root(root).await;
        if let Some(timer) = timer {
            timer.abort();
        }
        outcome?;

        let (stores, manifest) = run.into_parts();
        let (data, errors) = assemble(plan, &stores)?;
        let manifest = manifest.finish(now_millis());
        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "request finished with errors");
        }
        Ok(ExecutionResult {
            data,
            errors,
            manifest,
        })
    }
}

// --- helpers ---

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_is_rejected() {
        let cfg = ExecConfig {
            max_concurrent_batches: 0,
            ..Default::default()
        };
        assert!(matches!(Executor::new(cfg), Err(ExecError::Config(_))));
    }

    #[test]
    fn input_builder_sets_context() {
        let input = ExecutionInput::new(Value::from(1)).with_context("ctx");
        assert_eq!(input.root_value, Value::Int(1));
        assert_eq!(input.context, Value::from("ctx"));
    }
}

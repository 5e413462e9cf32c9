use batchplan_core::{LayerPlanId, StepId};
use thiserror::Error;

/// Result type local to the planner.
pub type Result<T> = std::result::Result<T, PlanError>;

/// Build errors. Every variant is fatal: no partial plan is ever returned.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("field plan failed at '{path}': {message}")]
    Callback { path: String, message: String },

    /// Any other build error raised while planning the field at `path`.
    #[error("field plan failed at '{path}': {source}")]
    Field {
        path: String,
        #[source]
        source: Box<PlanError>,
    },

    #[error("dependency cycle at '{path}' through steps {steps:?}")]
    Cycle { path: String, steps: Vec<StepId> },

    #[error("step {step} is not visible from {bucket}; copy it in from an ancestor first")]
    NotVisible { step: StepId, bucket: LayerPlanId },

    #[error("unknown step {0}")]
    UnknownStep(StepId),

    #[error("unknown layer plan {0}")]
    UnknownBucket(LayerPlanId),

    #[error("request at '{path}' exceeds the maximum depth of {limit}")]
    DepthExceeded { path: String, limit: usize },

    #[error("invalid request: {0}")]
    Request(String),

    #[error("request document: {0}")]
    Dsl(#[from] serde_yaml::Error),

    #[error(transparent)]
    Core(#[from] batchplan_core::Error),
}

impl PlanError {
    /// Failure raised from inside a field plan callback. The builder fills in
    /// the field path.
    pub fn callback(message: impl Into<String>) -> Self {
        PlanError::Callback {
            path: String::new(),
            message: message.into(),
        }
    }

    /// Tag an error raised while planning the field at `path` with that path.
    /// Errors that already carry a path are returned unchanged.
    pub(crate) fn at_field(self, path: &str) -> Self {
        match self {
            PlanError::Callback { path: p, message } if p.is_empty() => PlanError::Callback {
                path: path.to_string(),
                message,
            },
            e @ (PlanError::Callback { .. }
            | PlanError::Field { .. }
            | PlanError::DepthExceeded { .. }
            | PlanError::Cycle { .. }) => e,
            other => PlanError::Field {
                path: path.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Failures reported by a step evaluation.
///
/// Returned per row, `Failed` errors only that row. Returned for the whole
/// batch call, either variant errors every row in the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("resource unavailable: {0}")]
    Unavailable(String),
}

impl From<batchplan_core::Error> for StepError {
    fn from(e: batchplan_core::Error) -> Self {
        StepError::Failed(e.to_string())
    }
}

//! Planner and executor configuration that downstream crates can
//! serialize/deserialize.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Merge structurally identical steps within each bucket.
    pub dedupe: bool,

    /// Maximum nesting depth of the request tree; deeper requests fail to build.
    pub max_depth: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            dedupe: true,
            max_depth: 64,
        }
    }
}

impl PlannerConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `BATCHPLAN_DEDUPE`: `true`/`false`
    /// - `BATCHPLAN_MAX_DEPTH`: request nesting limit
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<bool>("BATCHPLAN_DEDUPE") {
            cfg.dedupe = v;
        }

        if let Some(v) = env_parse::<usize>("BATCHPLAN_MAX_DEPTH") {
            cfg.max_depth = v;
        }

        cfg
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Upper bound on non-sync batch calls in flight at once.
    pub max_concurrent_batches: usize,

    /// Run independent sibling buckets concurrently. Subtrees containing
    /// side effects always run sequentially regardless of this flag.
    pub parallel_buckets: bool,

    /// Cancel the request after this many milliseconds.
    pub request_timeout_ms: Option<u64>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 16,
            parallel_buckets: true,
            request_timeout_ms: None,
        }
    }
}

impl ExecConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `BATCHPLAN_MAX_CONCURRENT_BATCHES`: concurrent non-sync batch calls
    /// - `BATCHPLAN_PARALLEL_BUCKETS`: `true`/`false`
    /// - `BATCHPLAN_REQUEST_TIMEOUT_MS`: request timeout
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<usize>("BATCHPLAN_MAX_CONCURRENT_BATCHES") {
            cfg.max_concurrent_batches = v;
        }

        if let Some(v) = env_parse::<bool>("BATCHPLAN_PARALLEL_BUCKETS") {
            cfg.parallel_buckets = v;
        }

        if let Some(v) = env_parse::<u64>("BATCHPLAN_REQUEST_TIMEOUT_MS") {
            cfg.request_timeout_ms = Some(v);
        }

        cfg
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_concurrent_batches == 0 {
            return Err(crate::Error::Config(
                "max_concurrent_batches must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

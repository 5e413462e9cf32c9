//! YAML → RequestTree parser.
//!
//! Example:
//! ```yaml
//! config: { dedupe: true, max_concurrent_batches: 4 }
//! request:
//!   root_type: Query
//!   selections:
//!     - field: users
//!       kind: object
//!       type: User
//!       list: true
//!       selections:
//!         - { field: id, nullable: false }
//!         - field: pet
//!           kind: polymorphic
//!           type: Pet
//!           possible_types: [Dog, Cat]
//!           fragments:
//!             - on: Dog
//!               selections: [ { field: barks } ]
//! ```

use batchplan_core::config::{ExecConfig, PlannerConfig};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::RequestTree;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDocument {
    #[serde(default)]
    pub config: Option<DocConfig>,
    pub request: RequestTree,
}

/// Per-document overrides. Unset fields keep whatever the caller's config
/// (defaults or environment) already holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocConfig {
    pub dedupe: Option<bool>,
    pub max_depth: Option<usize>,
    pub max_concurrent_batches: Option<usize>,
    pub parallel_buckets: Option<bool>,
    pub request_timeout_ms: Option<u64>,
}

impl DocConfig {
    pub fn apply_planner(&self, cfg: &mut PlannerConfig) {
        if let Some(v) = self.dedupe {
            cfg.dedupe = v;
        }
        if let Some(v) = self.max_depth {
            cfg.max_depth = v;
        }
    }

    pub fn apply_exec(&self, cfg: &mut ExecConfig) {
        if let Some(v) = self.max_concurrent_batches {
            cfg.max_concurrent_batches = v;
        }
        if let Some(v) = self.parallel_buckets {
            cfg.parallel_buckets = v;
        }
        if let Some(v) = self.request_timeout_ms {
            cfg.request_timeout_ms = Some(v);
        }
    }
}

/// Parse and structurally validate a request document.
pub fn parse_yaml_request(src: &str) -> Result<RequestDocument> {
    let doc: RequestDocument = serde_yaml::from_str(src)?;
    doc.request.validate()?;
    Ok(doc)
}

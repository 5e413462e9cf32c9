#![forbid(unsafe_code)]
//! batchplan-exec: runs a finished operation plan against live input values.
//!
//! - Buckets are walked parent-first. Each bucket runs once per request over
//!   every row-context admitted into it, so a step is called once per bucket
//!   run no matter how many parent rows fed it.
//! - Within a bucket, steps run in dependency waves. Sync-and-safe steps are
//!   evaluated inline, other steps are awaited together under a concurrency
//!   limit, and side-effect steps are serialized in construction order.
//! - Row and batch failures become located errors in the result; only broken
//!   plans surface as [`ExecError`].

pub mod failpoints;
pub mod metrics;
pub mod output;
pub mod runtime;
pub mod scheduler;
pub mod store;

pub use output::{ExecutionResult, LocatedError, PathSegment};
pub use runtime::{ExecError, ExecutionInput, Executor};
pub use store::BucketStore;
pub use tokio_util::sync::CancellationToken;

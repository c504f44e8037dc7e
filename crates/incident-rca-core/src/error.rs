//! Error taxonomy for the cache and pipeline.
//!
//! None of these are fatal to a pipeline run as a whole: the controller
//! turns them into per-stage statuses at the incident boundary.

use thiserror::Error;

/// Errors from building or querying the similarity index.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No prior records to index. Callers treat this as "no cache available".
    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("k must be >= 1")]
    InvalidK,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Failure of the external analysis or solution generator.
///
/// Every variant leaves the stage unclaimed so a later run retries it.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("generator returned no usable text")]
    EmptyResponse,
}

/// Errors surfaced by whole-run entry points.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("incident not found: {0}")]
    NotFound(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

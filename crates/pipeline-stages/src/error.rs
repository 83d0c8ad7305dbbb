//! Per-stage error enums with a `retryable()` predicate, mirroring
//! `pipeline_orchestrator::error`'s shape so the Stage Runner can route the
//! transient/fatal taxonomy without inspecting string messages.

use pipeline_core::repository::DieselError;

use crate::collaborators::{AiError, RasterError, SimilarityEngineError};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no admissible input files for job {0}")]
    NoInputFiles(String),
    /// Observed at a cooperative yield point after the run was CANCELLED.
    #[error("run {0} cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error(transparent)]
    Store(#[from] DieselError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExtractError {
    /// A raster failure is almost always a broken input PDF or a missing
    /// poppler binary, neither of which resolves itself; everything else the
    /// store/filesystem layers raise is transient.
    pub fn retryable(&self) -> bool {
        matches!(self, ExtractError::Store(_) | ExtractError::Io(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no tenant or process-wide AI credential configured")]
    NoCredential,
    #[error("run {0} cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Store(#[from] DieselError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ParseError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ParseError::Ai(AiError::RateLimited) | ParseError::Ai(AiError::Transient(_)) | ParseError::Store(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CategorizeError {
    #[error("no categories configured for tenant {0}")]
    NoCategories(String),
    #[error("run {0} cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Store(#[from] DieselError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CategorizeError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CategorizeError::Ai(AiError::RateLimited)
                | CategorizeError::Ai(AiError::Transient(_))
                | CategorizeError::Store(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimilarityError {
    #[error("run {0} cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Engine(#[from] SimilarityEngineError),
    #[error(transparent)]
    Store(#[from] DieselError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SimilarityError {
    /// A timed-out or non-spawnable engine invocation is worth a retry; a
    /// nonzero exit means the engine itself rejected the input and running
    /// it again on the same data would fail the same way.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            SimilarityError::Engine(SimilarityEngineError::TimedOut(_))
                | SimilarityError::Engine(SimilarityEngineError::Spawn(_))
                | SimilarityError::Store(_)
                | SimilarityError::Io(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("filename collision writing {0}: two output groups sanitize to the same name")]
    FilenameCollision(String),
    #[error("run {0} cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Store(#[from] DieselError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SplitError {
    /// A collision is a data problem that retrying without a code change
    /// cannot fix.
    pub fn retryable(&self) -> bool {
        matches!(self, SplitError::Store(_) | SplitError::Io(_))
    }
}

//! Per-module error enums with a `retryable()` predicate, letting the Stage
//! Runner route the transient/fatal taxonomy without inspecting string
//! messages.

use pipeline_core::repository::DieselError;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("tenant {0} is not active")]
    TenantInactive(String),
    #[error("tenant {0} not found")]
    TenantNotFound(String),
    #[error("tenant {tenant_id} already has {active}/{max} active runs")]
    QuotaExceeded {
        tenant_id: String,
        active: u64,
        max: u32,
    },
    #[error("submission produced no usable inputs")]
    NoInputs,
    #[error("invalid source url: {0}")]
    InvalidUrl(String),
    #[error("run {0} not found")]
    RunNotFound(String),
    #[error("run {0} is already terminal")]
    AlreadyTerminal(String),
    #[error("run {0} is not terminal")]
    NotTerminal(String),
    #[error("run {0} is a batch child and cannot be restarted directly")]
    IsBatchChild(String),
    #[error("merge requires at least two runs")]
    FewerThanTwo,
    #[error("merge requires runs from a single tenant")]
    MixedTenants,
    #[error("merge requires every run to be completed")]
    NotCompleted,
    #[error("submission of {requested} inputs exceeds the admissible ceiling of {ceiling}")]
    TooManyInputs { requested: usize, ceiling: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] DieselError),
}

impl AdmissionError {
    /// Validation failures never succeed on retry; everything that reaches
    /// this module from the store layer is a fresh read, not worth retrying
    /// automatically (the caller decides whether to resubmit).
    pub fn retryable(&self) -> bool {
        matches!(self, AdmissionError::Store(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("child run {child_id} failed: {reason}")]
    ChildFailed { child_id: String, reason: String },
    #[error("coordinator timed out after {0:?}")]
    TimedOut(std::time::Duration),
    #[error(transparent)]
    Store(#[from] DieselError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoordinatorError {
    pub fn retryable(&self) -> bool {
        matches!(self, CoordinatorError::Store(_) | CoordinatorError::Io(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusMergeError {
    #[error("corpus merge timed out after {0:?}")]
    TimedOut(std::time::Duration),
    #[error(transparent)]
    Store(#[from] DieselError),
}

impl CorpusMergeError {
    pub fn retryable(&self) -> bool {
        matches!(self, CorpusMergeError::Store(_))
    }
}

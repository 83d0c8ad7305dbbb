//! PipelineJob — a record of one attempted execution of one stage of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::Stage;

/// Job lifecycle: PENDING → ACTIVE → {COMPLETED | RETRYING → ACTIVE | FAILED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "retrying" => Some(Self::Retrying),
            _ => None,
        }
    }
}

/// One attempted execution of one stage of one run.
///
/// For a given (run_id, stage) the most recent job is authoritative; earlier
/// retries are preserved for audit rather than overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: String,
    pub pipeline_run_id: String,
    pub stage: Stage,
    pub status: JobStatus,
    pub progress: u8,
    /// Queue claim handle, if the job is currently leased.
    pub external_job_id: Option<String>,
    pub error_message: Option<String>,
    /// Opaque result payload (e.g. output path, produced item count).
    pub result: Option<serde_json::Value>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineJob {
    pub fn new(pipeline_run_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline_run_id: pipeline_run_id.into(),
            stage,
            status: JobStatus::Pending,
            progress: 0,
            external_job_id: None,
            error_message: None,
            result: None,
            attempt: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

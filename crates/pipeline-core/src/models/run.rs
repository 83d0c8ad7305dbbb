//! PipelineRun — the unit of work, and its stage/status state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run lifecycle. Transitions are monotonic toward a terminal state; only
/// QUEUED→RUNNING and RUNNING→PAUSED are reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition per the run lifecycle.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Queued, Running) | (Queued, Cancelled) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Paused, Cancelled) => true,
            (terminal, _) if terminal.is_terminal() => false,
            _ => false,
        }
    }
}

/// Processing stage. `Coordinate` only appears on parent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Parse,
    Categorize,
    Coordinate,
    Similarity,
    Split,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Parse => "parse",
            Self::Categorize => "categorize",
            Self::Coordinate => "coordinate",
            Self::Similarity => "similarity",
            Self::Split => "split",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "extract" => Some(Self::Extract),
            "parse" => Some(Self::Parse),
            "categorize" => Some(Self::Categorize),
            "coordinate" => Some(Self::Coordinate),
            "similarity" => Some(Self::Similarity),
            "split" => Some(Self::Split),
            _ => None,
        }
    }

    /// The default lease duration for this stage.
    /// Coordinate alone uses a multi-hour lease to span the whole fan-in poll.
    pub fn default_lease(&self) -> std::time::Duration {
        match self {
            Self::Coordinate => std::time::Duration::from_secs(4 * 60 * 60),
            _ => std::time::Duration::from_secs(10 * 60),
        }
    }
}

/// One end-to-end execution of the pipeline for a specific input set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub tenant_id: String,
    pub input_files: Vec<String>,
    pub source_urls: Vec<String>,
    pub status: RunStatus,
    pub current_stage: Stage,
    /// 0..=100
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub parent_run_id: Option<String>,
    pub batch_index: Option<u32>,
    pub batch_size: Option<u32>,
    pub total_batches: Option<u32>,
    pub total_items: u32,
    pub processed_items: u32,
    pub total_questions: u32,
}

impl PipelineRun {
    /// A run with a non-null parentRunId; never progresses past categorize.
    pub fn is_child(&self) -> bool {
        self.parent_run_id.is_some()
    }

    /// A run with a non-null totalBatches and no parent; skips stages 1–3.
    pub fn is_parent(&self) -> bool {
        self.parent_run_id.is_none() && self.total_batches.is_some()
    }

    pub fn is_standalone(&self) -> bool {
        self.parent_run_id.is_none() && self.total_batches.is_none()
    }

    pub fn transition(&mut self, next: RunStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "illegal run transition {:?} -> {:?}",
                self.status, next
            ));
        }
        self.status = next;
        match next {
            RunStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_transitions_are_monotonic() {
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Paused));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Queued.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn parent_and_child_classification() {
        let mut run = PipelineRun {
            id: "r1".into(),
            tenant_id: "t1".into(),
            input_files: vec![],
            source_urls: vec![],
            status: RunStatus::Queued,
            current_stage: Stage::Extract,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            parent_run_id: None,
            batch_index: None,
            batch_size: None,
            total_batches: None,
            total_items: 0,
            processed_items: 0,
            total_questions: 0,
        };
        assert!(run.is_standalone());
        run.total_batches = Some(3);
        assert!(run.is_parent());
        run.total_batches = None;
        run.parent_run_id = Some("parent".into());
        assert!(run.is_child());
    }
}

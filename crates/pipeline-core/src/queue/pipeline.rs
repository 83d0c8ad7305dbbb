//! Progress events emitted by a [`super::stage_runner::StageRunner`] as it
//! leases, starts, and finishes work — forwarded to whatever observes run
//! progress (CLI output, the admission surface's polling, tests).

/// Progress events emitted by stage workers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ItemStarted {
        stage: String,
        item_id: String,
        label: String,
    },
    ItemCompleted {
        stage: String,
        item_id: String,
        detail: Option<String>,
    },
    ItemFailed {
        stage: String,
        item_id: String,
        error: String,
    },
}

//! Job/run bookkeeping shared by every Stage Processor: load the
//! authoritative job row, flip it and the run between
//! PENDING/ACTIVE/COMPLETED/FAILED, and hand off to the Chaining Policy once
//! a stage's job succeeds. This is the domain-level counterpart to the
//! event/state bookkeeping the Stage Runner does for queue-level leases
//! (`queue::stage_runner`); each processor's `process()` calls it around its
//! own work.

use pipeline_core::models::{PipelineJob, PipelineRun, RunStatus, Stage};
use pipeline_core::queue::{Outcome, Queue, StageRunnerError};
use pipeline_core::repository::Store;
use pipeline_orchestrator::Chainer;

/// Loads the run and the most recent job row for `stage` (authoritative per
/// the PipelineJob invariant), marks the job ACTIVE, and transitions the run
/// QUEUED -> RUNNING on its first stage.
pub async fn begin(
    store: &Store,
    run_id: &str,
    stage: Stage,
) -> Result<(PipelineRun, PipelineJob), StageRunnerError> {
    let mut run = store
        .runs
        .get(run_id)
        .await?
        .ok_or_else(|| StageRunnerError::Other(anyhow::anyhow!("run {run_id} not found")))?;

    let job = store
        .jobs
        .latest_for_stage(run_id, stage)
        .await?
        .ok_or_else(|| {
            StageRunnerError::Other(anyhow::anyhow!(
                "no job recorded for run {run_id} stage {stage:?}"
            ))
        })?;

    store.jobs.mark_active(&job.id, None).await?;

    if run.status == RunStatus::Queued {
        let _ = run.transition(RunStatus::Running);
        store.runs.save(&run).await?;
    }

    Ok((run, job))
}

/// Marks `job` COMPLETED with `result`, then consults the Chaining Policy
/// (via `chainer`) to enqueue the next stage or complete the run.
pub async fn complete<Q: Queue>(
    store: &Store,
    chainer: &Chainer<Q>,
    mut run: PipelineRun,
    job: &PipelineJob,
    stage: Stage,
    result: serde_json::Value,
) -> Result<Outcome, StageRunnerError> {
    store.jobs.mark_completed(&job.id, Some(&result)).await?;
    chainer.advance(&mut run, stage).await?;
    Ok(Outcome::Ack)
}

/// A retryable job failure: mark the job RETRYING and report Nack so the
/// Stage Runner's queue redelivers after `retry_delay`.
pub async fn fail_retryable(
    store: &Store,
    job: &PipelineJob,
    error: &str,
    retry_delay: std::time::Duration,
) -> Result<Outcome, StageRunnerError> {
    store.jobs.mark_failed(&job.id, error, true).await?;
    Ok(Outcome::Nack { retry_delay })
}

/// Observed cancellation at a cooperative yield point: mark the job FAILED
/// with a cancellation reason and ack the message. The run itself is left
/// untouched — an admin `cancel` already transitioned it to CANCELLED before
/// this was ever observed, so re-saving it here would be redundant.
pub async fn cancelled(store: &Store, job: &PipelineJob) -> Result<Outcome, StageRunnerError> {
    store.jobs.mark_failed(&job.id, "run cancelled", false).await?;
    Ok(Outcome::Ack)
}

/// A fatal job failure: mark the job and run FAILED. For a child run, the
/// parent's Coordinate job observes this on its next poll tick; there is no
/// direct propagation from here.
pub async fn fail_fatal(
    store: &Store,
    mut run: PipelineRun,
    job: &PipelineJob,
    error: &str,
) -> Result<Outcome, StageRunnerError> {
    store.jobs.mark_failed(&job.id, error, false).await?;
    run.error = Some(error.to_string());
    let _ = run.transition(RunStatus::Failed);
    store.runs.save(&run).await?;
    Ok(Outcome::Ack)
}

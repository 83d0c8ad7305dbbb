//! Batch Coordinator fan-in. Fan-out (parent + children creation, per-child
//! Extract enqueue) lives in
//! [`crate::admission::AdmissionController`], since it is driven by the same
//! submission codepath as a standalone run; this module only drives the
//! Coordinate stage's long poll loop once the parent's children are running.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pipeline_core::config::PipelineSettings;
use pipeline_core::models::{RunStatus, Stage};
use pipeline_core::queue::payloads::{CoordinatePayload, SimilarityPayload};
use pipeline_core::queue::stage_queue::Lease;
use pipeline_core::queue::{Outcome, Queue, StageContext, StageProcessor, StageRunnerError};
use pipeline_core::repository::Store;

pub struct CoordinateProcessor<Q> {
    store: Store,
    queue: Arc<Q>,
    settings: PipelineSettings,
}

impl<Q: Queue> CoordinateProcessor<Q> {
    pub fn new(store: Store, queue: Arc<Q>, settings: PipelineSettings) -> Self {
        Self {
            store,
            queue,
            settings,
        }
    }

    /// Hand-off: write the tenant's full item set to `categorized_merged.json`
    /// under the parent's output directory, enqueue Similarity on the
    /// parent, and mark the coordinate job COMPLETED.
    async fn hand_off(&self, tenant_id: &str, parent_run_id: &str, job_id: &str) -> Result<(), StageRunnerError> {
        let items = self.store.items.all_for_tenant(tenant_id).await?;

        let output_dir = self.settings.output_dir_for(tenant_id, parent_run_id);
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;
        let merged_path = output_dir.join("categorized_merged.json");
        let json = serde_json::to_vec_pretty(&items)
            .map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;
        std::fs::write(&merged_path, json).map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;

        let payload = SimilarityPayload {
            tenant_id: tenant_id.to_string(),
            pipeline_run_id: parent_run_id.to_string(),
            merged_corpus_path: merged_path.display().to_string(),
            output_dir: output_dir.display().to_string(),
            cross_encoder_threshold: 0.7,
            refine_threshold: 10,
        };
        self.queue
            .enqueue(Stage::Similarity.as_str(), tenant_id, &payload)
            .await?;

        let job = pipeline_core::models::PipelineJob::new(parent_run_id.to_string(), Stage::Similarity);
        self.store.jobs.create(&job).await?;

        let mut parent = self
            .store
            .runs
            .get(parent_run_id)
            .await?
            .ok_or_else(|| StageRunnerError::Other(anyhow::anyhow!("parent run vanished")))?;
        parent.current_stage = Stage::Similarity;
        parent.progress = 100;
        self.store.runs.save(&parent).await?;

        self.store.jobs.mark_completed(job_id, None).await?;

        Ok(())
    }

    async fn fail_parent(&self, parent_run_id: &str, job_id: &str, reason: &str) -> Result<(), StageRunnerError> {
        let mut parent = self
            .store
            .runs
            .get(parent_run_id)
            .await?
            .ok_or_else(|| StageRunnerError::Other(anyhow::anyhow!("parent run vanished")))?;
        parent.error = Some(reason.to_string());
        let _ = parent.transition(RunStatus::Failed);
        self.store.runs.save(&parent).await?;

        self.store.jobs.mark_failed(job_id, reason, false).await?;

        Ok(())
    }
}

#[async_trait]
impl<Q: Queue + 'static> StageProcessor for CoordinateProcessor<Q> {
    type Payload = CoordinatePayload;

    fn stage_name(&self) -> &str {
        Stage::Coordinate.as_str()
    }

    /// Polls every `coordinator_poll_interval` until every child is terminal
    /// or `coordinator_timeout` elapses. Held as one long-running lease; the
    /// Stage Runner's heartbeat keeps the lease alive across the whole loop.
    async fn process(&self, lease: &Lease<Self::Payload>, ctx: &StageContext) -> Result<Outcome, StageRunnerError> {
        let payload = &lease.payload;
        let started = Instant::now();

        let job = self
            .store
            .jobs
            .latest_for_stage(&payload.parent_run_id, Stage::Coordinate)
            .await?
            .ok_or_else(|| {
                StageRunnerError::Other(anyhow::anyhow!(
                    "no coordinate job recorded for parent run {}",
                    payload.parent_run_id
                ))
            })?;
        self.store.jobs.mark_active(&job.id, None).await?;

        loop {
            let parent = self
                .store
                .runs
                .get(&payload.parent_run_id)
                .await?
                .ok_or_else(|| StageRunnerError::Other(anyhow::anyhow!("parent run not found")))?;

            if parent.status.is_terminal() {
                return Ok(Outcome::Ack);
            }

            let children = self.store.runs.children_of(&payload.parent_run_id).await?;

            if let Some(failed) = children
                .iter()
                .find(|c| matches!(c.status, RunStatus::Failed | RunStatus::Cancelled))
            {
                self.fail_parent(
                    &payload.parent_run_id,
                    &job.id,
                    &format!("child run {} did not complete", failed.id),
                )
                .await?;
                return Ok(Outcome::Ack);
            }

            let completed = children
                .iter()
                .filter(|c| c.status == RunStatus::Completed)
                .count();

            if !children.is_empty() {
                let progress = ((completed * 100 + children.len() / 2) / children.len()) as u8;
                let mut parent = parent;
                let _ = parent.transition(RunStatus::Running);
                parent.progress = progress;
                self.store.runs.save(&parent).await?;
                ctx.report_progress(progress);
            }

            if !children.is_empty() && completed == children.len() {
                self.hand_off(&payload.tenant_id, &payload.parent_run_id, &job.id).await?;
                return Ok(Outcome::Ack);
            }

            if started.elapsed() >= self.settings.coordinator_timeout {
                self.fail_parent(&payload.parent_run_id, &job.id, "coordinator timed out waiting on children")
                    .await?;
                return Ok(Outcome::Ack);
            }

            tokio::time::sleep(self.settings.coordinator_poll_interval).await;
        }
    }
}

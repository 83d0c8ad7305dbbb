//! Applies the [`crate::chaining`] policy: enqueues the next stage's
//! message, creates its PENDING `PipelineJob` row, and advances the run's
//! `currentStage`.

use std::sync::Arc;

use pipeline_core::config::PipelineSettings;
use pipeline_core::models::{PipelineJob, PipelineRun, RunStatus, Stage};
use pipeline_core::queue::payloads::{
    CategorizePayload, ParsePayload, SimilarityPayload, SplitPayload,
};
use pipeline_core::queue::Queue;
use pipeline_core::repository::{DieselError, Store};

use crate::chaining::{next_action, NextAction};

pub struct Chainer<Q> {
    store: Store,
    queue: Arc<Q>,
    settings: PipelineSettings,
}

impl<Q: Queue> Chainer<Q> {
    pub fn new(store: Store, queue: Arc<Q>, settings: PipelineSettings) -> Self {
        Self {
            store,
            queue,
            settings,
        }
    }

    /// Called by a stage processor's caller once a stage's job has been
    /// marked COMPLETED for `run`. Builds the next stage's payload from the
    /// run's known output paths, enqueues it, and advances the run.
    pub async fn advance(&self, run: &mut PipelineRun, completed: Stage) -> Result<(), DieselError> {
        match next_action(completed, run.is_child()) {
            NextAction::Enqueue(next_stage) => {
                let payload_json = self.build_payload(run, next_stage)?;
                self.queue
                    .enqueue(next_stage.as_str(), &run.tenant_id, &payload_json)
                    .await?;

                let job = PipelineJob::new(run.id.clone(), next_stage);
                self.store.jobs.create(&job).await?;

                run.current_stage = next_stage;
                self.store.runs.save(run).await?;
            }
            NextAction::CompleteChildRun | NextAction::CompleteRun => {
                let _ = run.transition(RunStatus::Completed);
                self.store.runs.save(run).await?;
            }
        }
        Ok(())
    }

    /// Stage-specific payload bodies, derived from the persisted-layout
    /// convention `{OUTPUT_DIR}/{tenant}/{run}/...`. Parse's input
    /// image list is discovered by walking the run's output directory for
    /// the `*.png` crops Extract wrote under it, rather than threading the
    /// list through this call — the filesystem layout is itself the
    /// handoff contract.
    fn build_payload(
        &self,
        run: &PipelineRun,
        next_stage: Stage,
    ) -> Result<serde_json::Value, DieselError> {
        let output_dir = self.settings.output_dir_for(&run.tenant_id, &run.id);
        let output_dir_str = output_dir.display().to_string();

        let value = match next_stage {
            Stage::Parse => serde_json::to_value(ParsePayload {
                tenant_id: run.tenant_id.clone(),
                pipeline_run_id: run.id.clone(),
                image_paths: collect_png_paths(&output_dir),
                output_dir: output_dir_str,
            }),
            Stage::Categorize => serde_json::to_value(CategorizePayload {
                tenant_id: run.tenant_id.clone(),
                pipeline_run_id: run.id.clone(),
                parsed_path: output_dir.join("parsed.json").display().to_string(),
                output_dir: output_dir_str,
            }),
            Stage::Similarity => serde_json::to_value(SimilarityPayload {
                tenant_id: run.tenant_id.clone(),
                pipeline_run_id: run.id.clone(),
                merged_corpus_path: output_dir
                    .join("categorized_merged.json")
                    .display()
                    .to_string(),
                output_dir: output_dir_str,
                cross_encoder_threshold: 0.7,
                refine_threshold: 10,
            }),
            Stage::Split => serde_json::to_value(SplitPayload {
                tenant_id: run.tenant_id.clone(),
                pipeline_run_id: run.id.clone(),
                similarity_path: output_dir.join("similarity.json").display().to_string(),
                output_dir: output_dir_str,
            }),
            Stage::Extract | Stage::Coordinate => serde_json::Value::Null,
        };
        value.map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))
    }
}

/// Recursively collect every `*.png` path under `dir`, sorted for
/// deterministic ordering across repeated runs (idempotence).
fn collect_png_paths(dir: &std::path::Path) -> Vec<String> {
    let mut paths = Vec::new();
    walk_pngs(dir, &mut paths);
    paths.sort();
    paths
}

fn walk_pngs(dir: &std::path::Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_pngs(&path, out);
        } else if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")) {
            out.push(path.display().to_string());
        }
    }
}

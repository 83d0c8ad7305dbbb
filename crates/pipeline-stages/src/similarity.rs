//! Similarity — hands the tenant's merged corpus to the duplicate-detection
//! subprocess and records the `similarity_group_id` it assigns back onto
//! every item. A single-item corpus has nothing to compare against, so the
//! engine is skipped entirely in that case.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::config::PipelineSettings;
use pipeline_core::models::{Item, Stage};
use pipeline_core::queue::payloads::SimilarityPayload;
use pipeline_core::queue::stage_queue::Lease;
use pipeline_core::queue::{Outcome, Queue, StageContext, StageProcessor, StageRunnerError};
use pipeline_core::repository::Store;
use pipeline_orchestrator::Chainer;
use serde::Serialize;

use crate::collaborators::SimilarityEngine;
use crate::error::SimilarityError;
use crate::support;

#[derive(Debug, Serialize)]
struct SimilarityResult {
    total: usize,
    groups_found: usize,
    output_path: String,
}

pub struct SimilarityProcessor<Q, E> {
    store: Store,
    chainer: Arc<Chainer<Q>>,
    engine: Arc<E>,
    settings: PipelineSettings,
}

impl<Q, E> SimilarityProcessor<Q, E>
where
    Q: Queue,
    E: SimilarityEngine,
{
    pub fn new(store: Store, chainer: Arc<Chainer<Q>>, engine: Arc<E>, settings: PipelineSettings) -> Self {
        Self {
            store,
            chainer,
            engine,
            settings,
        }
    }

    async fn run_job(
        &self,
        payload: &SimilarityPayload,
        ctx: &StageContext,
    ) -> Result<(SimilarityResult, Vec<Item>), SimilarityError> {
        if ctx.is_cancelled() {
            return Err(SimilarityError::Cancelled(payload.pipeline_run_id.clone()));
        }

        let output_dir = PathBuf::from(&payload.output_dir);
        tokio::fs::create_dir_all(&output_dir).await?;
        let output_path = output_dir.join("similarity.json");

        // Clean restart: a prior attempt may have left a similarity.json and
        // a downstream split/ directory from a different category taxonomy
        // or corpus snapshot. Both are fully regenerated below, so stale
        // copies are removed up front rather than risking leftover split
        // files Split never overwrites.
        let _ = tokio::fs::remove_file(&output_path).await;
        let _ = tokio::fs::remove_dir_all(output_dir.join("split")).await;

        let corpus_bytes = tokio::fs::read(&payload.merged_corpus_path).await?;
        let corpus: Vec<Item> = serde_json::from_slice(&corpus_bytes)?;

        if ctx.is_cancelled() {
            return Err(SimilarityError::Cancelled(payload.pipeline_run_id.clone()));
        }

        let items = if corpus.len() < 2 {
            tokio::fs::write(&output_path, &corpus_bytes).await?;
            corpus
        } else {
            self.engine
                .run(
                    std::path::Path::new(&payload.merged_corpus_path),
                    &output_path,
                    payload.cross_encoder_threshold as f32,
                    payload.refine_threshold.max(0) as u32,
                    self.settings.similarity_timeout,
                )
                .await?;

            let result_bytes = tokio::fs::read(&output_path).await?;
            serde_json::from_slice(&result_bytes)?
        };
        ctx.report_progress(90);

        if ctx.is_cancelled() {
            return Err(SimilarityError::Cancelled(payload.pipeline_run_id.clone()));
        }

        let mut groups = std::collections::HashSet::new();
        for item in &items {
            if let Some(group_id) = &item.similarity_group_id {
                groups.insert(group_id.clone());
            }
            self.store
                .items
                .set_similarity_group(&item.tenant_id, &item.file, item.similarity_group_id.as_deref())
                .await?;
        }

        ctx.report_progress(100);
        Ok((
            SimilarityResult {
                total: items.len(),
                groups_found: groups.len(),
                output_path: output_path.display().to_string(),
            },
            items,
        ))
    }
}

#[async_trait]
impl<Q, E> StageProcessor for SimilarityProcessor<Q, E>
where
    Q: Queue + 'static,
    E: SimilarityEngine + 'static,
{
    type Payload = SimilarityPayload;

    fn stage_name(&self) -> &str {
        Stage::Similarity.as_str()
    }

    async fn process(&self, lease: &Lease<Self::Payload>, ctx: &StageContext) -> Result<Outcome, StageRunnerError> {
        let payload = &lease.payload;
        let (run, job) = support::begin(&self.store, &payload.pipeline_run_id, Stage::Similarity).await?;

        match self.run_job(payload, ctx).await {
            Ok((result, _items)) => {
                let result_json = serde_json::to_value(&result)
                    .map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;
                support::complete(&self.store, &self.chainer, run, &job, Stage::Similarity, result_json).await
            }
            Err(SimilarityError::Cancelled(_)) => support::cancelled(&self.store, &job).await,
            Err(e) if e.retryable() => {
                support::fail_retryable(&self.store, &job, &e.to_string(), std::time::Duration::from_secs(30)).await
            }
            Err(e) => support::fail_fatal(&self.store, run, &job, &e.to_string()).await,
        }
    }
}

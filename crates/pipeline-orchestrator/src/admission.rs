//! Admission Controller — validates a new submission and decides
//! standalone vs. batch.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use pipeline_core::config::PipelineSettings;
use pipeline_core::models::{PipelineJob, PipelineRun, RunStatus, Stage};
use pipeline_core::queue::payloads::ExtractPayload;
use pipeline_core::queue::Queue;
use pipeline_core::repository::Store;

use crate::error::AdmissionError;
use crate::filename::{deduplicate, filename_from_url, sanitize_filename};

/// One materialized input: a PDF body already buffered into memory (an
/// upload) or fetched from a URL, with the filename it will be persisted
/// under in the run's upload directory.
pub struct MaterializedInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Raw submission inputs before materialization.
pub enum SubmissionInput {
    Upload { filename: String, bytes: Vec<u8> },
    Url(String),
}

/// Outcome of a successful `submit`.
pub struct SubmitResult {
    pub run: PipelineRun,
    /// Present when the submission fanned out into a batch; the run above
    /// is the parent in that case.
    pub children: Vec<PipelineRun>,
}

pub struct AdmissionController<Q> {
    store: Store,
    queue: std::sync::Arc<Q>,
    settings: PipelineSettings,
    http: reqwest::Client,
}

impl<Q: Queue> AdmissionController<Q> {
    pub fn new(store: Store, queue: std::sync::Arc<Q>, settings: PipelineSettings) -> Self {
        Self {
            store,
            queue,
            settings,
            http: reqwest::Client::new(),
        }
    }

    /// Checks for a conflicting active run, enforces the per-tenant input
    /// ceiling, materializes every input, and creates the run (plus batch
    /// children, if more than one input was admitted).
    pub async fn submit(
        &self,
        tenant_id: &str,
        inputs: Vec<SubmissionInput>,
    ) -> Result<SubmitResult, AdmissionError> {
        // Step 1: tenant must be active.
        let tenant = self
            .store
            .tenants
            .get(tenant_id)
            .await?
            .ok_or_else(|| AdmissionError::TenantNotFound(tenant_id.to_string()))?;
        if !tenant.active {
            return Err(AdmissionError::TenantInactive(tenant_id.to_string()));
        }

        // Step 2: quota check, counting only non-child runs.
        let active = self.store.runs.count_active_for_tenant(tenant_id).await?;
        if active >= tenant.max_concurrent_pipelines as u64 {
            return Err(AdmissionError::QuotaExceeded {
                tenant_id: tenant_id.to_string(),
                active,
                max: tenant.max_concurrent_pipelines,
            });
        }

        // Step 3: materialize inputs.
        let materialized = self.materialize(inputs).await?;

        // Step 4: zero-input rejection, then standalone/batch routing.
        if materialized.is_empty() {
            return Err(AdmissionError::NoInputs);
        }

        let ceiling = self.settings.max_admissible_inputs();
        if materialized.len() as u32 > ceiling {
            return Err(AdmissionError::TooManyInputs {
                requested: materialized.len(),
                ceiling,
            });
        }

        if materialized.len() as u32 > self.settings.batch_size {
            self.fan_out(tenant_id, materialized).await
        } else {
            self.submit_standalone(tenant_id, materialized).await
        }
    }

    /// Buffers uploads as-is; fetches URL sources sequentially (not
    /// concurrently — each fetch's duration is individually accountable),
    /// validates scheme, filename-safes, and deduplicates.
    async fn materialize(
        &self,
        inputs: Vec<SubmissionInput>,
    ) -> Result<Vec<MaterializedInput>, AdmissionError> {
        let mut out = Vec::with_capacity(inputs.len());
        let mut taken: HashSet<String> = HashSet::new();

        for input in inputs {
            let (filename, bytes) = match input {
                SubmissionInput::Upload { filename, bytes } => {
                    (sanitize_filename(&filename), bytes)
                }
                SubmissionInput::Url(url) => {
                    let parsed = url::Url::parse(&url)
                        .map_err(|_| AdmissionError::InvalidUrl(url.clone()))?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        return Err(AdmissionError::InvalidUrl(url));
                    }
                    let started = std::time::Instant::now();
                    let response = self
                        .http
                        .get(parsed.clone())
                        .send()
                        .await
                        .map_err(|_| AdmissionError::InvalidUrl(url.clone()))?;
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|_| AdmissionError::InvalidUrl(url.clone()))?
                        .to_vec();
                    tracing::debug!(url = %url, elapsed = ?started.elapsed(), "fetched submission input");
                    (filename_from_url(parsed.as_str()), bytes)
                }
            };

            let deduped = deduplicate(&filename, &taken);
            taken.insert(deduped.clone());
            out.push(MaterializedInput {
                filename: deduped,
                bytes,
            });
        }

        Ok(out)
    }

    async fn submit_standalone(
        &self,
        tenant_id: &str,
        inputs: Vec<MaterializedInput>,
    ) -> Result<SubmitResult, AdmissionError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let upload_dir = self.settings.upload_dir_for(tenant_id, &run_id);
        let output_dir = self.settings.output_dir_for(tenant_id, &run_id);
        let filenames = self.persist_inputs(&upload_dir, &inputs)?;

        let mut run = new_run(&run_id, tenant_id, filenames.clone(), None, None, None, None);
        run.total_items = filenames.len() as u32;
        self.store.runs.create(&run).await?;

        self.enqueue_extract(&run, &upload_dir, &output_dir).await?;

        Ok(SubmitResult {
            run,
            children: Vec::new(),
        })
    }

    /// Fan-out: a parent `coordinate` run plus `ceil(N / BATCH_SIZE)`
    /// children, each owning a disjoint slice of inputs.
    async fn fan_out(
        &self,
        tenant_id: &str,
        inputs: Vec<MaterializedInput>,
    ) -> Result<SubmitResult, AdmissionError> {
        let batch_size = self.settings.batch_size as usize;
        let total_batches = inputs.len().div_ceil(batch_size) as u32;

        let parent_id = uuid::Uuid::new_v4().to_string();
        let parent_upload_dir = self.settings.upload_dir_for(tenant_id, &parent_id);
        std::fs::create_dir_all(&parent_upload_dir)?;
        for input in &inputs {
            std::fs::write(parent_upload_dir.join(&input.filename), &input.bytes)?;
        }

        let mut parent = new_run(
            &parent_id,
            tenant_id,
            inputs.iter().map(|i| i.filename.clone()).collect(),
            None,
            None,
            Some(total_batches),
            None,
        );
        parent.current_stage = Stage::Coordinate;
        parent.total_items = inputs.len() as u32;
        self.store.runs.create(&parent).await?;

        let mut children = Vec::with_capacity(total_batches as usize);
        for (batch_index, chunk) in inputs.chunks(batch_size).enumerate() {
            let child_id = uuid::Uuid::new_v4().to_string();
            let child_upload_dir = self.settings.upload_dir_for(tenant_id, &child_id);
            let child_output_dir = self.settings.output_dir_for(tenant_id, &child_id);
            let filenames: Vec<String> = chunk.iter().map(|i| i.filename.clone()).collect();
            self.persist_inputs(&child_upload_dir, chunk)?;

            let mut child = new_run(
                &child_id,
                tenant_id,
                filenames,
                Some(parent_id.clone()),
                Some(batch_index as u32),
                Some(total_batches),
                Some(batch_size as u32),
            );
            child.total_items = chunk.len() as u32;
            self.store.runs.create(&child).await?;
            self.enqueue_extract(&child, &child_upload_dir, &child_output_dir)
                .await?;
            children.push(child);
        }

        let coordinate_payload = pipeline_core::queue::payloads::CoordinatePayload {
            tenant_id: tenant_id.to_string(),
            parent_run_id: parent_id.clone(),
        };
        self.queue
            .enqueue(Stage::Coordinate.as_str(), tenant_id, &coordinate_payload)
            .await?;
        let coordinate_job = PipelineJob::new(parent_id.clone(), Stage::Coordinate);
        self.store.jobs.create(&coordinate_job).await?;

        Ok(SubmitResult {
            run: parent,
            children,
        })
    }

    fn persist_inputs(
        &self,
        upload_dir: &PathBuf,
        inputs: &[MaterializedInput],
    ) -> Result<Vec<String>, AdmissionError> {
        std::fs::create_dir_all(upload_dir)?;
        let mut filenames = Vec::with_capacity(inputs.len());
        for input in inputs {
            std::fs::write(upload_dir.join(&input.filename), &input.bytes)?;
            filenames.push(input.filename.clone());
        }
        Ok(filenames)
    }

    async fn enqueue_extract(
        &self,
        run: &PipelineRun,
        upload_dir: &PathBuf,
        output_dir: &PathBuf,
    ) -> Result<(), AdmissionError> {
        let payload = ExtractPayload {
            tenant_id: run.tenant_id.clone(),
            pipeline_run_id: run.id.clone(),
            upload_dir: upload_dir.display().to_string(),
            input_files: run.input_files.clone(),
            output_dir: output_dir.display().to_string(),
        };
        self.queue
            .enqueue(Stage::Extract.as_str(), &run.tenant_id, &payload)
            .await?;
        let job = PipelineJob::new(run.id.clone(), Stage::Extract);
        self.store.jobs.create(&job).await?;
        Ok(())
    }

    /// `cancel`: reject already-terminal runs, otherwise mark CANCELLED.
    pub async fn cancel(&self, run_id: &str) -> Result<(), AdmissionError> {
        let mut run = self
            .store
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| AdmissionError::RunNotFound(run_id.to_string()))?;
        if run.status.is_terminal() {
            return Err(AdmissionError::AlreadyTerminal(run_id.to_string()));
        }
        run.transition(RunStatus::Cancelled)
            .map_err(|_| AdmissionError::AlreadyTerminal(run_id.to_string()))?;
        self.store.runs.save(&run).await?;
        Ok(())
    }

    /// `delete`: reject non-terminal runs; cascades jobs and items, leaving
    /// filesystem cleanup to the caller (the admission surface owns paths).
    pub async fn delete(&self, run_id: &str) -> Result<(), AdmissionError> {
        let run = self
            .store
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| AdmissionError::RunNotFound(run_id.to_string()))?;
        if !run.status.is_terminal() {
            return Err(AdmissionError::NotTerminal(run_id.to_string()));
        }
        self.store.jobs.delete_for_run(run_id).await?;
        self.store.items.delete_for_runs(&[run_id.to_string()]).await?;
        self.store.runs.delete(run_id).await?;
        Ok(())
    }

    /// `list`: paged filter over runs.
    pub async fn list(
        &self,
        tenant_id: Option<&str>,
        status: Option<RunStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PipelineRun>, AdmissionError> {
        Ok(self
            .store
            .runs
            .list(tenant_id, status, false, limit, offset)
            .await?)
    }

    /// `restart`: not permitted on a batch child; for a batch parent,
    /// deletes children/items/jobs and repeats fan-out from the preserved
    /// upload directory. For a standalone run, simply re-enqueues Extract.
    pub async fn restart(&self, run_id: &str) -> Result<PipelineRun, AdmissionError> {
        let run = self
            .store
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| AdmissionError::RunNotFound(run_id.to_string()))?;
        if !run.status.is_terminal() {
            return Err(AdmissionError::NotTerminal(run_id.to_string()));
        }
        if run.is_child() {
            return Err(AdmissionError::IsBatchChild(run_id.to_string()));
        }

        if run.is_parent() {
            self.restart_batch_parent(run).await
        } else {
            self.restart_standalone(run).await
        }
    }

    async fn restart_standalone(&self, mut run: PipelineRun) -> Result<PipelineRun, AdmissionError> {
        self.store.items.delete_for_runs(&[run.id.clone()]).await?;
        self.store.jobs.delete_for_run(&run.id).await?;

        run.status = RunStatus::Queued;
        run.current_stage = Stage::Extract;
        run.progress = 0;
        run.error = None;
        run.started_at = None;
        run.completed_at = None;
        run.processed_items = 0;
        self.store.runs.save(&run).await?;

        let upload_dir = self.settings.upload_dir_for(&run.tenant_id, &run.id);
        let output_dir = self.settings.output_dir_for(&run.tenant_id, &run.id);
        self.enqueue_extract(&run, &upload_dir, &output_dir).await?;
        Ok(run)
    }

    async fn restart_batch_parent(&self, mut parent: PipelineRun) -> Result<PipelineRun, AdmissionError> {
        let children = self.store.runs.children_of(&parent.id).await?;
        let mut run_ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
        run_ids.push(parent.id.clone());

        self.store.items.delete_for_runs(&run_ids).await?;
        for run_id in &run_ids {
            self.store.jobs.delete_for_run(run_id).await?;
        }
        for child in &children {
            let child_output_dir = self.settings.output_dir_for(&child.tenant_id, &child.id);
            let _ = std::fs::remove_dir_all(child_output_dir);
            self.store.runs.delete(&child.id).await?;
        }
        let parent_output_dir = self.settings.output_dir_for(&parent.tenant_id, &parent.id);
        let _ = std::fs::remove_dir_all(parent_output_dir);

        let upload_dir = self.settings.upload_dir_for(&parent.tenant_id, &parent.id);
        let mut inputs = Vec::new();
        for entry in std::fs::read_dir(&upload_dir)? {
            let entry = entry?;
            let bytes = std::fs::read(entry.path())?;
            let filename = entry.file_name().to_string_lossy().to_string();
            inputs.push(MaterializedInput { filename, bytes });
        }

        parent.status = RunStatus::Queued;
        parent.current_stage = Stage::Coordinate;
        parent.progress = 0;
        parent.error = None;
        parent.started_at = None;
        parent.completed_at = None;
        parent.processed_items = 0;
        self.store.runs.save(&parent).await?;

        let result = self.fan_out(&parent.tenant_id.clone(), inputs).await?;
        Ok(result.run)
    }

    /// `merge`: combine several completed runs' items under a fresh run so
    /// their corpora can be re-split together. Requires >=2 runs, a single
    /// tenant, and every run COMPLETED.
    pub async fn merge(&self, run_ids: &[String]) -> Result<PipelineRun, AdmissionError> {
        if run_ids.len() < 2 {
            return Err(AdmissionError::FewerThanTwo);
        }

        let mut runs = Vec::with_capacity(run_ids.len());
        for id in run_ids {
            let run = self
                .store
                .runs
                .get(id)
                .await?
                .ok_or_else(|| AdmissionError::RunNotFound(id.clone()))?;
            runs.push(run);
        }

        let tenant_id = runs[0].tenant_id.clone();
        if runs.iter().any(|r| r.tenant_id != tenant_id) {
            return Err(AdmissionError::MixedTenants);
        }
        if runs.iter().any(|r| r.status != RunStatus::Completed) {
            return Err(AdmissionError::NotCompleted);
        }

        let merged_id = uuid::Uuid::new_v4().to_string();
        let input_files: Vec<String> = runs.iter().flat_map(|r| r.input_files.clone()).collect();
        let mut merged = new_run(&merged_id, &tenant_id, input_files, None, None, None, None);
        merged.current_stage = Stage::Similarity;
        let _ = merged.transition(RunStatus::Running);
        self.store.runs.create(&merged).await?;

        // Same hand-off shape as the Coordinator's: snapshot the tenant's
        // full corpus (the merged runs' items already live there) and drive
        // the new run into Similarity -> Split so it gets a real re-split
        // rather than a fabricated COMPLETED status.
        let items = self.store.items.all_for_tenant(&tenant_id).await?;
        let output_dir = self.settings.output_dir_for(&tenant_id, &merged_id);
        std::fs::create_dir_all(&output_dir)?;
        let merged_path = output_dir.join("categorized_merged.json");
        std::fs::write(&merged_path, serde_json::to_vec_pretty(&items)?)?;

        let payload = pipeline_core::queue::payloads::SimilarityPayload {
            tenant_id: tenant_id.clone(),
            pipeline_run_id: merged_id.clone(),
            merged_corpus_path: merged_path.display().to_string(),
            output_dir: output_dir.display().to_string(),
            cross_encoder_threshold: 0.7,
            refine_threshold: 10,
        };
        self.queue
            .enqueue(Stage::Similarity.as_str(), &tenant_id, &payload)
            .await?;
        let job = PipelineJob::new(merged_id.clone(), Stage::Similarity);
        self.store.jobs.create(&job).await?;

        Ok(merged)
    }
}

#[allow(clippy::too_many_arguments)]
fn new_run(
    id: &str,
    tenant_id: &str,
    input_files: Vec<String>,
    parent_run_id: Option<String>,
    batch_index: Option<u32>,
    total_batches: Option<u32>,
    batch_size: Option<u32>,
) -> PipelineRun {
    PipelineRun {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        input_files,
        source_urls: Vec::new(),
        status: RunStatus::Queued,
        current_stage: Stage::Extract,
        progress: 0,
        error: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        parent_run_id,
        batch_index,
        batch_size,
        total_batches,
        total_items: 0,
        processed_items: 0,
        total_questions: 0,
    }
}

//! Extract — scans each page of every input PDF for question markers, crops
//! one PNG per question, and writes a per-PDF manifest. The only
//! Stage Processor whose inputs are a list of PDF paths rather than a
//! previous stage's JSON output; everything downstream is keyed off the
//! flat image-path list this stage hands to Parse via the Chaining Policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::models::Stage;
use pipeline_core::queue::payloads::ExtractPayload;
use pipeline_core::queue::stage_queue::Lease;
use pipeline_core::queue::{Outcome, Queue, StageContext, StageProcessor, StageRunnerError};
use pipeline_core::repository::Store;
use pipeline_orchestrator::Chainer;
use serde::{Deserialize, Serialize};

use crate::collaborators::PdfRasterizer;
use crate::error::ExtractError;
use crate::marker::find_markers;
use crate::support;

/// Default rasterization DPI; the payload carries no override today, so
/// every job runs at this fixed resolution.
const DEFAULT_DPI: u32 = 150;
/// Crop padding above each marker's y-coordinate, in PDF points.
const CROP_PADDING_PT: f32 = 10.0;

/// One entry in a PDF's manifest — the record Extract leaves behind
/// alongside the crops so a later re-run (or an auditor) can see which
/// marker produced which file without re-scanning the PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub source_pdf: String,
    pub points: u32,
}

#[derive(Debug, Serialize)]
struct ExtractResult {
    total: usize,
    image_paths: Vec<String>,
}

pub struct ExtractProcessor<Q, R> {
    store: Store,
    chainer: Arc<Chainer<Q>>,
    rasterizer: Arc<R>,
}

impl<Q, R> ExtractProcessor<Q, R>
where
    Q: Queue,
    R: PdfRasterizer,
{
    pub fn new(store: Store, chainer: Arc<Chainer<Q>>, rasterizer: Arc<R>) -> Self {
        Self {
            store,
            chainer,
            rasterizer,
        }
    }

    /// Crops every marker found across every page of one PDF, writing PNGs
    /// under `pdf_out_dir` and a `manifest.json` describing them. The
    /// counter is threaded in (and returned) because filenames are run-global
    /// — `{pdfStem}_q{NNN}_{points}pt.png` numbers questions across the
    /// whole run, not per-PDF.
    async fn extract_one_pdf(
        &self,
        pdf_path: &Path,
        pdf_stem: &str,
        pdf_out_dir: &Path,
        mut counter: u32,
    ) -> Result<(u32, Vec<String>), ExtractError> {
        tokio::fs::create_dir_all(pdf_out_dir).await?;

        let page_count = self.rasterizer.page_count(pdf_path).await?;
        let mut manifest = Vec::new();
        let mut image_paths = Vec::new();

        for page in 1..=page_count {
            let lines = self.rasterizer.page_lines(pdf_path, page).await?;
            let markers = find_markers(&lines);
            if markers.is_empty() {
                continue;
            }
            let (_, page_height_pt) = self.rasterizer.page_size_pt(pdf_path, page).await?;

            for (i, marker) in markers.iter().enumerate() {
                let y_top = (marker.y - CROP_PADDING_PT).max(0.0);
                let y_bottom = markers.get(i + 1).map(|m| m.y);

                counter += 1;
                let file_name = format!("{pdf_stem}_q{counter:03}_{}pt.png", marker.points);
                let out_path = pdf_out_dir.join(&file_name);

                self.rasterizer
                    .crop_page(pdf_path, page, DEFAULT_DPI, y_top, y_bottom.or(Some(page_height_pt)), &out_path)
                    .await?;

                manifest.push(ManifestEntry {
                    file: file_name.clone(),
                    source_pdf: pdf_stem.to_string(),
                    points: marker.points,
                });
                image_paths.push(out_path.display().to_string());
            }
        }

        let manifest_path = pdf_out_dir.join("manifest.json");
        tokio::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?).await?;

        Ok((counter, image_paths))
    }

    async fn run_job(&self, payload: &ExtractPayload, ctx: &StageContext) -> Result<ExtractResult, ExtractError> {
        if payload.input_files.is_empty() {
            return Err(ExtractError::NoInputFiles(payload.pipeline_run_id.clone()));
        }

        let upload_dir = PathBuf::from(&payload.upload_dir);
        let output_dir = PathBuf::from(&payload.output_dir);
        tokio::fs::create_dir_all(&output_dir).await?;

        let total_pdfs = payload.input_files.len();
        let mut counter = 0u32;
        let mut all_image_paths = Vec::new();

        for (index, input_file) in payload.input_files.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(ExtractError::Cancelled(payload.pipeline_run_id.clone()));
            }

            let pdf_path = upload_dir.join(input_file);
            let pdf_stem = Path::new(input_file)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document")
                .to_string();
            let pdf_out_dir = output_dir.join(&pdf_stem);

            let (new_counter, mut image_paths) =
                self.extract_one_pdf(&pdf_path, &pdf_stem, &pdf_out_dir, counter).await?;
            let questions_this_pdf = new_counter - counter;
            counter = new_counter;
            all_image_paths.append(&mut image_paths);

            let progress = (((index + 1) as f64 / total_pdfs as f64) * 100.0).round() as u8;
            self.store
                .runs
                .bump_extract_progress(&payload.pipeline_run_id, 1, questions_this_pdf, progress.min(100))
                .await?;
            ctx.report_progress(progress);
        }

        all_image_paths.sort();
        Ok(ExtractResult {
            total: all_image_paths.len(),
            image_paths: all_image_paths,
        })
    }
}

#[async_trait]
impl<Q, R> StageProcessor for ExtractProcessor<Q, R>
where
    Q: Queue + 'static,
    R: PdfRasterizer + 'static,
{
    type Payload = ExtractPayload;

    fn stage_name(&self) -> &str {
        Stage::Extract.as_str()
    }

    async fn process(&self, lease: &Lease<Self::Payload>, ctx: &StageContext) -> Result<Outcome, StageRunnerError> {
        let payload = &lease.payload;
        let (run, job) = support::begin(&self.store, &payload.pipeline_run_id, Stage::Extract).await?;

        match self.run_job(payload, ctx).await {
            Ok(result) => {
                let result_json = serde_json::to_value(&result)
                    .map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;
                support::complete(&self.store, &self.chainer, run, &job, Stage::Extract, result_json).await
            }
            Err(ExtractError::Cancelled(_)) => support::cancelled(&self.store, &job).await,
            Err(e) if e.retryable() => {
                support::fail_retryable(&self.store, &job, &e.to_string(), std::time::Duration::from_secs(30)).await
            }
            Err(e) => support::fail_fatal(&self.store, run, &job, &e.to_string()).await,
        }
    }
}

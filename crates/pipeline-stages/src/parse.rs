//! AI Parse — submits each Extract-produced crop to the vision model and
//! records a structured transcription or a per-item failure. Up to
//! 10 images are in flight per job; each image gets up to 3 attempts with
//! the 429/transient backoff split from `pipeline_core::rate_limit`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use pipeline_core::config::PipelineSettings;
use pipeline_core::models::Stage;
use pipeline_core::queue::payloads::ParsePayload;
use pipeline_core::queue::stage_queue::Lease;
use pipeline_core::queue::{Outcome, Queue, StageContext, StageProcessor, StageRunnerError};
use pipeline_core::rate_limit::{ai_rate_limit_backoff, ai_transient_backoff};
use pipeline_core::repository::Store;
use pipeline_orchestrator::Chainer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborators::{AiError, VisionModelClient};
use crate::error::ParseError;
use crate::support;

/// Images processed concurrently within one job.
const MAX_IN_FLIGHT: usize = 10;
/// Attempts per image before the item is recorded as a permanent failure.
const MAX_ATTEMPTS: u32 = 3;

/// One image's parse outcome — `file` is the stable artifact filename that
/// becomes the Item natural key once Categorize merges it into the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseRecord {
    pub file: String,
    pub source_pdf: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct ParseResult {
    total: usize,
    successful: usize,
    path: String,
}

pub struct ParseProcessor<Q, V> {
    store: Store,
    chainer: Arc<Chainer<Q>>,
    vision: Arc<V>,
    settings: PipelineSettings,
}

impl<Q, V> ParseProcessor<Q, V>
where
    Q: Queue,
    V: VisionModelClient,
{
    pub fn new(store: Store, chainer: Arc<Chainer<Q>>, vision: Arc<V>, settings: PipelineSettings) -> Self {
        Self {
            store,
            chainer,
            vision,
            settings,
        }
    }

    async fn resolve_credential(&self, tenant_id: &str) -> Result<String, ParseError> {
        let tenant = self.store.tenants.get(tenant_id).await?;
        tenant
            .and_then(|t| t.ai_credential)
            .or_else(|| self.settings.default_ai_credential.clone())
            .ok_or(ParseError::NoCredential)
    }

    /// One image, up to `MAX_ATTEMPTS` tries. Transient failures (rate
    /// limit, malformed JSON, network) never fail the job — after the last
    /// attempt the image is recorded as `{success:false}` instead.
    async fn parse_one(&self, credential: &str, image_path: &str) -> ParseRecord {
        let path = Path::new(image_path);
        let file = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(image_path)
            .to_string();
        let source_pdf = pdf_stem_from_image_filename(&file);
        let mime_type = mime_type_for(path);

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => {
                return ParseRecord {
                    file,
                    source_pdf,
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                    error_type: Some("io_error".to_string()),
                }
            }
        };

        let mut last_error: Option<(String, &'static str)> = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.vision.extract_question(credential, &bytes, mime_type).await {
                Ok(data) => {
                    return ParseRecord {
                        file,
                        source_pdf,
                        success: true,
                        data: Some(data),
                        error: None,
                        error_type: None,
                    }
                }
                Err(AiError::RateLimited) => {
                    last_error = Some(("rate limited".to_string(), "rate_limit"));
                    tokio::time::sleep(ai_rate_limit_backoff(attempt)).await;
                }
                Err(AiError::Transient(msg)) => {
                    last_error = Some((msg, "transient"));
                    tokio::time::sleep(ai_transient_backoff()).await;
                }
                Err(AiError::Fatal(msg)) => {
                    last_error = Some((msg, "fatal"));
                    break;
                }
            }
        }

        let (error, error_type) = last_error.unwrap_or(("unknown error".to_string(), "unknown"));
        ParseRecord {
            file,
            source_pdf,
            success: false,
            data: None,
            error: Some(error),
            error_type: Some(error_type.to_string()),
        }
    }

    async fn run_job(
        &self,
        payload: &ParsePayload,
        ctx: &StageContext,
    ) -> Result<(ParseResult, Vec<ParseRecord>), ParseError> {
        if ctx.is_cancelled() {
            return Err(ParseError::Cancelled(payload.pipeline_run_id.clone()));
        }

        let credential = self.resolve_credential(&payload.tenant_id).await?;
        let output_dir = PathBuf::from(&payload.output_dir);
        tokio::fs::create_dir_all(&output_dir).await?;

        let total = payload.image_paths.len().max(1);
        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let records: Vec<ParseRecord> = stream::iter(payload.image_paths.iter())
            .map(|image_path| {
                let credential = credential.clone();
                let done = Arc::clone(&done);
                async move {
                    let record = self.parse_one(&credential, image_path).await;
                    let completed = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                    let progress = ((completed as f64 / total as f64) * 100.0).round() as u8;
                    ctx.report_progress(progress);
                    record
                }
            })
            .buffer_unordered(MAX_IN_FLIGHT)
            .collect()
            .await;

        if ctx.is_cancelled() {
            return Err(ParseError::Cancelled(payload.pipeline_run_id.clone()));
        }

        // `buffer_unordered` completes in whatever order images finish;
        // re-sort by file for deterministic output across identical reruns.
        let mut records = records;
        records.sort_by(|a, b| a.file.cmp(&b.file));

        let successful = records.iter().filter(|r| r.success).count();
        let parsed_path = output_dir.join("parsed.json");
        tokio::fs::write(&parsed_path, serde_json::to_vec_pretty(&records)?).await?;

        Ok((
            ParseResult {
                total: records.len(),
                successful,
                path: parsed_path.display().to_string(),
            },
            records,
        ))
    }
}

/// `{pdfStem}_q{NNN}_{points}pt.png` -> `{pdfStem}` — Extract's filename
/// convention is the only place the source PDF's stem survives once only
/// the flat image-path list is threaded to Parse.
fn pdf_stem_from_image_filename(file_name: &str) -> String {
    match file_name.rfind("_q") {
        Some(idx) => file_name[..idx].to_string(),
        None => file_name.to_string(),
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "image/png",
    }
}

#[async_trait]
impl<Q, V> StageProcessor for ParseProcessor<Q, V>
where
    Q: Queue + 'static,
    V: VisionModelClient + 'static,
{
    type Payload = ParsePayload;

    fn stage_name(&self) -> &str {
        Stage::Parse.as_str()
    }

    async fn process(&self, lease: &Lease<Self::Payload>, ctx: &StageContext) -> Result<Outcome, StageRunnerError> {
        let payload = &lease.payload;
        let (run, job) = support::begin(&self.store, &payload.pipeline_run_id, Stage::Parse).await?;

        match self.run_job(payload, ctx).await {
            Ok((result, _records)) => {
                let result_json = serde_json::to_value(&result)
                    .map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;
                support::complete(&self.store, &self.chainer, run, &job, Stage::Parse, result_json).await
            }
            Err(ParseError::Cancelled(_)) => support::cancelled(&self.store, &job).await,
            Err(e) if e.retryable() => {
                support::fail_retryable(&self.store, &job, &e.to_string(), std::time::Duration::from_secs(30)).await
            }
            Err(e) => support::fail_fatal(&self.store, run, &job, &e.to_string()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_pdf_stem_from_extract_filename_convention() {
        assert_eq!(
            pdf_stem_from_image_filename("exam2024_q007_5pt.png"),
            "exam2024"
        );
    }

    #[test]
    fn mime_type_defaults_to_png() {
        assert_eq!(mime_type_for(Path::new("a.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a")), "image/png");
    }
}

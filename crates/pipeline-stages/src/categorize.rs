//! Categorize — classifies each parsed question against the tenant's
//! category taxonomy, merges the run's items into the tenant's
//! shared corpus via the Corpus Merge transaction, and writes both the
//! run-scoped and tenant-wide output snapshots Similarity and Split read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use pipeline_core::config::PipelineSettings;
use pipeline_core::models::{Categorization, Item, Stage, Tenant};
use pipeline_core::queue::payloads::CategorizePayload;
use pipeline_core::queue::stage_queue::Lease;
use pipeline_core::queue::{Outcome, Queue, StageContext, StageProcessor, StageRunnerError};
use pipeline_core::rate_limit::{ai_rate_limit_backoff, ai_transient_backoff};
use pipeline_core::repository::Store;
use pipeline_orchestrator::{Chainer, CorpusMerge};
use serde::Serialize;

use crate::collaborators::{AiError, LanguageModelClient};
use crate::error::CategorizeError;
use crate::parse::ParseRecord;
use crate::support;

/// Items processed concurrently within one job, matching Parse's fan-out.
const MAX_IN_FLIGHT: usize = 10;
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Serialize)]
struct CategorizeResult {
    total: usize,
    categorized: usize,
    merged_path: String,
}

pub struct CategorizeProcessor<Q, L> {
    store: Store,
    chainer: Arc<Chainer<Q>>,
    language: Arc<L>,
    settings: PipelineSettings,
}

impl<Q, L> CategorizeProcessor<Q, L>
where
    Q: Queue,
    L: LanguageModelClient,
{
    pub fn new(store: Store, chainer: Arc<Chainer<Q>>, language: Arc<L>, settings: PipelineSettings) -> Self {
        Self {
            store,
            chainer,
            language,
            settings,
        }
    }

    async fn resolve_credential(&self, tenant: &Tenant) -> Result<String, CategorizeError> {
        tenant
            .ai_credential
            .clone()
            .or_else(|| self.settings.default_ai_credential.clone())
            .ok_or_else(|| CategorizeError::NoCategories(tenant.id.clone()))
    }

    /// One item, up to `MAX_ATTEMPTS` tries; final failure becomes a
    /// recorded `Categorization` error rather than a job failure, the same
    /// contract Parse uses for its own per-image failures.
    async fn categorize_one(
        &self,
        credential: &str,
        prompt: &str,
        category_names: &[String],
        allowed_subcategories: &HashMap<String, Vec<String>>,
    ) -> Categorization {
        let mut last_error: Option<String> = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.language.categorize_question(credential, prompt, category_names).await {
                Ok(value) => return resolve_categorization(value, category_names, allowed_subcategories),
                Err(AiError::RateLimited) => {
                    last_error = Some("rate limited".to_string());
                    tokio::time::sleep(ai_rate_limit_backoff(attempt)).await;
                }
                Err(AiError::Transient(msg)) => {
                    last_error = Some(msg);
                    tokio::time::sleep(ai_transient_backoff()).await;
                }
                Err(AiError::Fatal(msg)) => {
                    last_error = Some(msg);
                    break;
                }
            }
        }

        Categorization {
            success: false,
            category: None,
            subcategory: None,
            reasoning: None,
            error: Some(last_error.unwrap_or_else(|| "unknown error".to_string())),
        }
    }

    async fn run_job(
        &self,
        payload: &CategorizePayload,
        ctx: &StageContext,
    ) -> Result<(CategorizeResult, Vec<Item>), CategorizeError> {
        if ctx.is_cancelled() {
            return Err(CategorizeError::Cancelled(payload.pipeline_run_id.clone()));
        }

        let tenant = self
            .store
            .tenants
            .get(&payload.tenant_id)
            .await?
            .ok_or_else(|| CategorizeError::NoCategories(payload.tenant_id.clone()))?;

        let parsed_bytes = tokio::fs::read(&payload.parsed_path).await?;
        let records: Vec<ParseRecord> = serde_json::from_slice(&parsed_bytes)?;

        let sorted_categories = tenant.sorted_categories();
        let category_names: Vec<String> = dedup_preserve_order(sorted_categories.iter().map(|c| c.name.clone()));
        let mut allowed_subcategories: HashMap<String, Vec<String>> = HashMap::new();
        for category in &sorted_categories {
            if let Some(sub) = &category.subcategory {
                allowed_subcategories.entry(category.name.clone()).or_default().push(sub.clone());
            }
        }

        let no_categories = category_names.is_empty();
        let credential = if no_categories {
            None
        } else {
            Some(self.resolve_credential(&tenant).await?)
        };

        let mut items = Vec::with_capacity(records.len());
        let mut pending: Vec<usize> = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            if !record.success || no_categories || !record_has_data(record) {
                items.push(build_item(payload, record, default_categorization(record, no_categories)));
            } else {
                items.push(build_item(payload, record, Categorization {
                    success: false,
                    category: None,
                    subcategory: None,
                    reasoning: None,
                    error: None,
                }));
                pending.push(idx);
            }
        }

        if !pending.is_empty() {
            let credential = credential.expect("credential resolved when categories configured");
            let total = pending.len();
            let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let results = futures::stream::iter(pending.iter().copied())
                .map(|idx| {
                    let credential = credential.clone();
                    let category_names = &category_names;
                    let allowed_subcategories = &allowed_subcategories;
                    let prompt = build_prompt(&records[idx]);
                    let done = Arc::clone(&done);
                    async move {
                        let categorization = self
                            .categorize_one(&credential, &prompt, category_names, allowed_subcategories)
                            .await;
                        let completed = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                        let progress = ((completed as f64 / total as f64) * 100.0).round() as u8;
                        ctx.report_progress(progress);
                        (idx, categorization)
                    }
                })
                .buffer_unordered(MAX_IN_FLIGHT)
                .collect::<Vec<_>>()
                .await;

            for (idx, categorization) in results {
                items[idx].categorization = Some(categorization);
            }
        }

        if ctx.is_cancelled() {
            return Err(CategorizeError::Cancelled(payload.pipeline_run_id.clone()));
        }

        let categorized_path = PathBuf::from(&payload.output_dir).join("categorized.json");
        tokio::fs::create_dir_all(&payload.output_dir).await?;
        tokio::fs::write(&categorized_path, serde_json::to_vec_pretty(&items)?).await?;

        // A merge timeout has no dedicated CategorizeError variant; fold it
        // into Store so it's treated as retryable, same as the merge's own
        // transaction-contention failures.
        let merge = CorpusMerge::new(self.store.clone());
        let merged = merge.merge(&payload.tenant_id, &items).await.map_err(|e| match e {
            pipeline_orchestrator::CorpusMergeError::Store(err) => CategorizeError::Store(err),
            pipeline_orchestrator::CorpusMergeError::TimedOut(_) => {
                CategorizeError::Store(pipeline_core::repository::DieselError::NotFound)
            }
        })?;

        let merged_path = PathBuf::from(&payload.output_dir).join("categorized_merged.json");
        tokio::fs::write(&merged_path, serde_json::to_vec_pretty(&merged)?).await?;

        let categorized_count = items.iter().filter(|i| i.categorization.as_ref().map(|c| c.success).unwrap_or(false)).count();

        Ok((
            CategorizeResult {
                total: items.len(),
                categorized: categorized_count,
                merged_path: merged_path.display().to_string(),
            },
            merged,
        ))
    }
}

/// An item's parse `data` is non-empty when present and not JSON null — an
/// empty/absent payload has nothing to send the language model, same as a
/// failed parse.
fn record_has_data(record: &ParseRecord) -> bool {
    record.data.as_ref().is_some_and(|v| !v.is_null())
}

fn default_categorization(record: &ParseRecord, no_categories: bool) -> Categorization {
    if no_categories {
        Categorization::no_categories_configured()
    } else {
        let error = if !record.success {
            "parse failed upstream"
        } else {
            "parse produced no data"
        };
        Categorization {
            success: false,
            category: None,
            subcategory: None,
            reasoning: None,
            error: Some(error.to_string()),
        }
    }
}

fn build_item(payload: &CategorizePayload, record: &ParseRecord, categorization: Categorization) -> Item {
    Item {
        tenant_id: payload.tenant_id.clone(),
        file: record.file.clone(),
        pipeline_run_id: payload.pipeline_run_id.clone(),
        source_document_id: record.source_pdf.clone(),
        success: record.success,
        parse_payload: record.data.clone().unwrap_or(serde_json::Value::Null),
        categorization: Some(categorization),
        similarity_group_id: None,
        marked_wrong: false,
        marked_wrong_at: None,
    }
}

fn build_prompt(record: &ParseRecord) -> String {
    let data = record.data.clone().unwrap_or(serde_json::Value::Null);
    let question_text = data.get("question_text").and_then(|v| v.as_str()).unwrap_or("");
    let correct_answer = data.get("correct_answer").and_then(|v| v.as_str()).unwrap_or("");
    format!("Question:\n{question_text}\n\nCorrect answer:\n{correct_answer}")
}

/// Matches the AI's returned `category`/`subcategory` strings against the
/// tenant's taxonomy: exact case-insensitive match first, then a substring
/// fallback for near-miss phrasing. A subcategory outside the matched
/// category's allowed set is dropped rather than treated as a fatal
/// mismatch — the category assignment still carries useful signal.
fn resolve_categorization(
    value: serde_json::Value,
    category_names: &[String],
    allowed_subcategories: &HashMap<String, Vec<String>>,
) -> Categorization {
    let raw_category = value.get("category").and_then(|v| v.as_str()).map(|s| s.to_string());
    let raw_subcategory = value.get("subcategory").and_then(|v| v.as_str()).map(|s| s.to_string());
    let reasoning = value.get("reasoning").and_then(|v| v.as_str()).map(|s| s.to_string());

    let matched_category = raw_category.as_deref().and_then(|raw| match_category(raw, category_names));

    let category = match matched_category {
        Some(name) => name,
        None => {
            return Categorization {
                success: false,
                category: None,
                subcategory: None,
                reasoning,
                error: Some(format!(
                    "AI returned unrecognized category {:?}",
                    raw_category.unwrap_or_default()
                )),
            }
        }
    };

    let subcategory = raw_subcategory.and_then(|raw| {
        let allowed = allowed_subcategories.get(&category)?;
        allowed
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(&raw))
            .cloned()
    });

    Categorization {
        success: true,
        category: Some(category),
        subcategory,
        reasoning,
        error: None,
    }
}

fn match_category(raw: &str, category_names: &[String]) -> Option<String> {
    if let Some(exact) = category_names.iter().find(|name| name.eq_ignore_ascii_case(raw)) {
        return Some(exact.clone());
    }
    category_names
        .iter()
        .find(|name| raw.to_ascii_lowercase().contains(&name.to_ascii_lowercase()))
        .cloned()
}

fn dedup_preserve_order(iter: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in iter {
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}

#[async_trait]
impl<Q, L> StageProcessor for CategorizeProcessor<Q, L>
where
    Q: Queue + 'static,
    L: LanguageModelClient + 'static,
{
    type Payload = CategorizePayload;

    fn stage_name(&self) -> &str {
        Stage::Categorize.as_str()
    }

    async fn process(&self, lease: &Lease<Self::Payload>, ctx: &StageContext) -> Result<Outcome, StageRunnerError> {
        let payload = &lease.payload;
        let (run, job) = support::begin(&self.store, &payload.pipeline_run_id, Stage::Categorize).await?;

        match self.run_job(payload, ctx).await {
            Ok((result, _merged)) => {
                let result_json = serde_json::to_value(&result)
                    .map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;
                support::complete(&self.store, &self.chainer, run, &job, Stage::Categorize, result_json).await
            }
            Err(CategorizeError::Cancelled(_)) => support::cancelled(&self.store, &job).await,
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
    fn match_category_falls_back_to_substring() {
        let names = vec!["Anatomy".to_string(), "Physiology".to_string()];
        assert_eq!(match_category("anatomy", &names), Some("Anatomy".to_string()));
        assert_eq!(
            match_category("Human Anatomy basics", &names),
            Some("Anatomy".to_string())
        );
        assert_eq!(match_category("Biochemistry", &names), None);
    }

    #[test]
    fn resolve_categorization_drops_unlisted_subcategory() {
        let names = vec!["Anatomy".to_string()];
        let mut allowed = HashMap::new();
        allowed.insert("Anatomy".to_string(), vec!["Skeletal".to_string()]);

        let value = serde_json::json!({"category": "Anatomy", "subcategory": "Nope", "reasoning": "r"});
        let result = resolve_categorization(value, &names, &allowed);
        assert!(result.success);
        assert_eq!(result.category.as_deref(), Some("Anatomy"));
        assert_eq!(result.subcategory, None);
    }

    #[test]
    fn resolve_categorization_fails_on_unknown_category() {
        let names = vec!["Anatomy".to_string()];
        let allowed = HashMap::new();
        let value = serde_json::json!({"category": "Chemistry"});
        let result = resolve_categorization(value, &names, &allowed);
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}

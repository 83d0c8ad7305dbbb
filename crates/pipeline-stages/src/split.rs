//! Split — the terminal stage: groups the tenant's similarity-
//! deduplicated corpus by category/subcategory, then by similarity group
//! within each bucket, and writes one JSON file per bucket. Completing this
//! stage completes the run — the Chaining Policy's `Split -> CompleteRun`
//! mapping needs no special case here, `support::complete` handles it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::models::{Item, Stage};
use pipeline_core::queue::payloads::SplitPayload;
use pipeline_core::queue::stage_queue::Lease;
use pipeline_core::queue::{Outcome, Queue, StageContext, StageProcessor, StageRunnerError};
use pipeline_core::repository::Store;
use pipeline_orchestrator::filename::sanitize_category_name;
use pipeline_orchestrator::Chainer;
use serde::Serialize;

use crate::error::SplitError;
use crate::support;

#[derive(Debug, Serialize)]
struct SplitOutput<'a> {
    category_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subcategory_name: Option<&'a str>,
    groups: Vec<Vec<&'a Item>>,
}

#[derive(Debug, Serialize)]
struct SplitResult {
    total: usize,
    buckets: usize,
    output_dir: String,
}

pub struct SplitProcessor<Q> {
    store: Store,
    chainer: Arc<Chainer<Q>>,
}

impl<Q> SplitProcessor<Q>
where
    Q: Queue,
{
    pub fn new(store: Store, chainer: Arc<Chainer<Q>>) -> Self {
        Self { store, chainer }
    }

    async fn run_job(&self, payload: &SplitPayload, ctx: &StageContext) -> Result<SplitResult, SplitError> {
        if ctx.is_cancelled() {
            return Err(SplitError::Cancelled(payload.pipeline_run_id.clone()));
        }

        let corpus_bytes = tokio::fs::read(&payload.similarity_path).await?;
        let items: Vec<Item> = serde_json::from_slice(&corpus_bytes)?;

        let split_dir = PathBuf::from(&payload.output_dir).join("split");
        tokio::fs::create_dir_all(&split_dir).await?;

        // Bucket key: (category, subcategory-or-none). Items carrying
        // neither are excluded from every bucket.
        let mut buckets: HashMap<(String, Option<String>), Vec<&Item>> = HashMap::new();
        let mut bucket_order: Vec<(String, Option<String>)> = Vec::new();

        for item in &items {
            let Some(categorization) = &item.categorization else { continue };
            let Some(category) = &categorization.category else { continue };
            let key = (category.clone(), categorization.subcategory.clone());
            if !buckets.contains_key(&key) {
                bucket_order.push(key.clone());
            }
            buckets.entry(key).or_default().push(item);
        }

        let mut seen_safe_names: HashMap<String, (String, Option<String>)> = HashMap::new();

        for key in &bucket_order {
            let (category, subcategory) = key;
            let bucket_items = &buckets[key];

            let label = match subcategory {
                Some(sub) => sub.as_str(),
                None => category.as_str(),
            };
            let safe_name = sanitize_category_name(label);

            if let Some(existing) = seen_safe_names.get(&safe_name) {
                if existing != key {
                    return Err(SplitError::FilenameCollision(safe_name));
                }
            } else {
                seen_safe_names.insert(safe_name.clone(), key.clone());
            }

            let mut groups: HashMap<String, Vec<&Item>> = HashMap::new();
            let mut group_order: Vec<String> = Vec::new();
            let mut null_counter = 0u32;

            for item in bucket_items {
                let group_id = match &item.similarity_group_id {
                    Some(id) => id.clone(),
                    None => {
                        null_counter += 1;
                        format!("__null_{null_counter}")
                    }
                };
                if !groups.contains_key(&group_id) {
                    group_order.push(group_id.clone());
                }
                groups.entry(group_id).or_default().push(item);
            }

            group_order.sort_by_key(|id| std::cmp::Reverse(groups[id].len()));

            let ordered_groups: Vec<Vec<&Item>> = group_order.iter().map(|id| groups[id].clone()).collect();

            let output = SplitOutput {
                category_name: category,
                subcategory_name: subcategory.as_deref(),
                groups: ordered_groups,
            };

            let path = split_dir.join(format!("{safe_name}.json"));
            tokio::fs::write(&path, serde_json::to_vec_pretty(&output)?).await?;

            for item in bucket_items.iter() {
                self.store
                    .items
                    .set_similarity_group(&item.tenant_id, &item.file, item.similarity_group_id.as_deref())
                    .await?;
            }
        }

        ctx.report_progress(100);
        Ok(SplitResult {
            total: items.len(),
            buckets: bucket_order.len(),
            output_dir: split_dir.display().to_string(),
        })
    }
}

#[async_trait]
impl<Q> StageProcessor for SplitProcessor<Q>
where
    Q: Queue + 'static,
{
    type Payload = SplitPayload;

    fn stage_name(&self) -> &str {
        Stage::Split.as_str()
    }

    async fn process(&self, lease: &Lease<Self::Payload>, ctx: &StageContext) -> Result<Outcome, StageRunnerError> {
        let payload = &lease.payload;
        let (run, job) = support::begin(&self.store, &payload.pipeline_run_id, Stage::Split).await?;

        match self.run_job(payload, ctx).await {
            Ok(result) => {
                let result_json = serde_json::to_value(&result)
                    .map_err(|e| StageRunnerError::Other(anyhow::anyhow!(e)))?;
                support::complete(&self.store, &self.chainer, run, &job, Stage::Split, result_json).await
            }
            Err(SplitError::Cancelled(_)) => support::cancelled(&self.store, &job).await,
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
    use pipeline_core::models::Categorization;

    fn item(file: &str, category: &str, subcategory: Option<&str>, group: Option<&str>) -> Item {
        Item {
            tenant_id: "t1".to_string(),
            file: file.to_string(),
            pipeline_run_id: "r1".to_string(),
            source_document_id: "doc".to_string(),
            success: true,
            parse_payload: serde_json::Value::Null,
            categorization: Some(Categorization {
                success: true,
                category: Some(category.to_string()),
                subcategory: subcategory.map(|s| s.to_string()),
                reasoning: None,
                error: None,
            }),
            similarity_group_id: group.map(|g| g.to_string()),
            marked_wrong: false,
            marked_wrong_at: None,
        }
    }

    #[test]
    fn groups_sort_by_member_count_descending() {
        let items = vec![
            item("a.png", "Anatomy", None, Some("g1")),
            item("b.png", "Anatomy", None, Some("g2")),
            item("c.png", "Anatomy", None, Some("g1")),
            item("d.png", "Anatomy", None, Some("g1")),
        ];

        let mut groups: HashMap<String, Vec<&Item>> = HashMap::new();
        for item in &items {
            groups.entry(item.similarity_group_id.clone().unwrap()).or_default().push(item);
        }
        let mut order: Vec<String> = groups.keys().cloned().collect();
        order.sort_by_key(|id| std::cmp::Reverse(groups[id].len()));
        assert_eq!(order[0], "g1");
    }
}

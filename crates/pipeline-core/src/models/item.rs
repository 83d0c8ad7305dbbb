//! Item — the tenant-scoped question record produced by extract/parse and
//! mutated by categorize, similarity, and split.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categorization payload attached by the categorize stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Categorization {
    pub success: bool,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub reasoning: Option<String>,
    pub error: Option<String>,
}

impl Categorization {
    pub fn no_categories_configured() -> Self {
        Self {
            success: false,
            category: None,
            subcategory: None,
            reasoning: None,
            error: Some("No categories configured".to_string()),
        }
    }
}

/// A tenant-scoped question record. Natural key: (tenant_id, file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub tenant_id: String,
    /// Stable artifact filename generated by the extract stage.
    pub file: String,
    /// Last writer.
    pub pipeline_run_id: String,
    pub source_document_id: String,
    pub success: bool,
    /// Opaque structured parse payload (question_number/points/question_text/...).
    pub parse_payload: serde_json::Value,
    pub categorization: Option<Categorization>,
    pub similarity_group_id: Option<String>,
    pub marked_wrong: bool,
    pub marked_wrong_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Natural key used by the Corpus Merge upsert.
    pub fn natural_key(&self) -> (&str, &str) {
        (&self.tenant_id, &self.file)
    }
}

//! Stage message payloads — the wire format carried inside a
//! [`super::Lease`]. Every message also carries `stage`/`partition_key`
//! (tenant_id, or pipeline_run_id when no tenant applies) at the queue
//! layer; these structs are only the stage-specific body: a list of file
//! paths, an output directory, and optional tuning parameters.

use serde::{Deserialize, Serialize};

/// Every stage payload carries the id of the run the Stage Runner's
/// heartbeat should watch for cancellation — `pipeline_run_id` for the
/// five per-run stages, `parent_run_id` for Coordinate (whose own run *is*
/// the parent it polls).
pub trait HasRunId {
    fn run_id(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractPayload {
    pub tenant_id: String,
    pub pipeline_run_id: String,
    pub upload_dir: String,
    pub input_files: Vec<String>,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsePayload {
    pub tenant_id: String,
    pub pipeline_run_id: String,
    /// Produced by Extract: one entry per rasterized PDF page image.
    pub image_paths: Vec<String>,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizePayload {
    pub tenant_id: String,
    pub pipeline_run_id: String,
    /// `{OUTPUT_DIR}/{tenant}/{run}/parsed.json` produced by Parse.
    pub parsed_path: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatePayload {
    pub tenant_id: String,
    pub parent_run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityPayload {
    pub tenant_id: String,
    pub pipeline_run_id: String,
    /// `categorized_merged.json` — the full tenant corpus snapshot.
    pub merged_corpus_path: String,
    pub output_dir: String,
    pub cross_encoder_threshold: f64,
    pub refine_threshold: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitPayload {
    pub tenant_id: String,
    pub pipeline_run_id: String,
    /// `similarity.json` produced by Similarity.
    pub similarity_path: String,
    pub output_dir: String,
}

impl HasRunId for ExtractPayload {
    fn run_id(&self) -> &str {
        &self.pipeline_run_id
    }
}

impl HasRunId for ParsePayload {
    fn run_id(&self) -> &str {
        &self.pipeline_run_id
    }
}

impl HasRunId for CategorizePayload {
    fn run_id(&self) -> &str {
        &self.pipeline_run_id
    }
}

impl HasRunId for CoordinatePayload {
    fn run_id(&self) -> &str {
        &self.parent_run_id
    }
}

impl HasRunId for SimilarityPayload {
    fn run_id(&self) -> &str {
        &self.pipeline_run_id
    }
}

impl HasRunId for SplitPayload {
    fn run_id(&self) -> &str {
        &self.pipeline_run_id
    }
}

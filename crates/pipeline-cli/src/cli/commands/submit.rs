//! `submit` — reads local files and/or fetches URLs, then hands them to the
//! Admission Controller.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use pipeline_core::queue::stage_queue::DbStageQueue;
use pipeline_orchestrator::{AdmissionController, SubmissionInput};

use super::load_settings_and_store;

pub async fn cmd_submit(tenant_id: &str, files: Vec<PathBuf>, urls: Vec<String>) -> anyhow::Result<()> {
    if files.is_empty() && urls.is_empty() {
        anyhow::bail!("submit requires at least one --file or --url");
    }

    let (settings, store) = load_settings_and_store().await?;
    let queue = Arc::new(DbStageQueue::new(store.pool().clone()));
    let controller = AdmissionController::new(store, queue, settings);

    let mut inputs = Vec::with_capacity(files.len() + urls.len());
    for path in &files {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload.pdf")
            .to_string();
        inputs.push(SubmissionInput::Upload { filename, bytes });
    }
    for url in urls {
        inputs.push(SubmissionInput::Url(url));
    }

    let result = controller.submit(tenant_id, inputs).await?;

    if result.children.is_empty() {
        println!("{} Submitted run {}", style("✓").green(), result.run.id);
    } else {
        println!(
            "{} Submitted batch run {} with {} children",
            style("✓").green(),
            result.run.id,
            result.children.len()
        );
        for child in &result.children {
            println!("  {} child run {}", style("-").dim(), child.id);
        }
    }

    Ok(())
}

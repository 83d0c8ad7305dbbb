//! `merge` — combines two or more completed same-tenant runs into one.

use std::sync::Arc;

use console::style;
use pipeline_core::queue::stage_queue::DbStageQueue;
use pipeline_orchestrator::AdmissionController;

use super::load_settings_and_store;

pub async fn cmd_merge(run_ids: &[String]) -> anyhow::Result<()> {
    if run_ids.len() < 2 {
        anyhow::bail!("merge requires at least two run IDs");
    }

    let (settings, store) = load_settings_and_store().await?;
    let queue = Arc::new(DbStageQueue::new(store.pool().clone()));
    let controller = AdmissionController::new(store, queue, settings);

    let merged = controller.merge(run_ids).await?;
    println!("{} Merged into run {}", style("✓").green(), merged.id);
    Ok(())
}

//! `cancel` — cancels a queued or running run.

use std::sync::Arc;

use console::style;
use pipeline_core::queue::stage_queue::DbStageQueue;
use pipeline_orchestrator::AdmissionController;

use super::load_settings_and_store;

pub async fn cmd_cancel(run_id: &str) -> anyhow::Result<()> {
    let (settings, store) = load_settings_and_store().await?;
    let queue = Arc::new(DbStageQueue::new(store.pool().clone()));
    let controller = AdmissionController::new(store, queue, settings);

    controller.cancel(run_id).await?;
    println!("{} Cancelled run {}", style("✓").green(), run_id);
    Ok(())
}

//! `restart` — re-enqueues a run (or a batch parent's children) from the
//! beginning.

use std::sync::Arc;

use console::style;
use pipeline_core::queue::stage_queue::DbStageQueue;
use pipeline_orchestrator::AdmissionController;

use super::load_settings_and_store;

pub async fn cmd_restart(run_id: &str) -> anyhow::Result<()> {
    let (settings, store) = load_settings_and_store().await?;
    let queue = Arc::new(DbStageQueue::new(store.pool().clone()));
    let controller = AdmissionController::new(store, queue, settings);

    let run = controller.restart(run_id).await?;
    println!("{} Restarted run {} (stage {})", style("✓").green(), run.id, run.current_stage.as_str());
    Ok(())
}

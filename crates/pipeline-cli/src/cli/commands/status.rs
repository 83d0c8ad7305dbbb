//! `status` — shows one run's detail (including its job history) or lists a
//! tenant's runs.

use console::style;

use super::load_settings_and_store;

pub async fn cmd_status(run_id: Option<&str>, tenant_id: Option<&str>) -> anyhow::Result<()> {
    let (_settings, store) = load_settings_and_store().await?;

    if let Some(run_id) = run_id {
        let run = store
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no run {run_id}"))?;

        println!("{} {}", style("run").bold(), run.id);
        println!("  tenant:     {}", run.tenant_id);
        println!("  status:     {}", run.status.as_str());
        println!("  stage:      {}", run.current_stage.as_str());
        println!("  progress:   {}%", run.progress);
        println!(
            "  items:      {}/{} processed, {} questions extracted",
            run.processed_items, run.total_items, run.total_questions
        );
        if let Some(parent) = &run.parent_run_id {
            println!("  parent:     {parent}");
        }
        if let Some(error) = &run.error {
            println!("  {} {}", style("error:").red(), error);
        }

        let jobs = store.jobs.list_for_run(run_id).await?;
        if !jobs.is_empty() {
            println!("  jobs:");
            for job in jobs {
                println!(
                    "    {:<12} {:<10} attempt {} {}",
                    job.stage.as_str(),
                    job.status.as_str(),
                    job.attempt,
                    job.error_message.as_deref().unwrap_or("")
                );
            }
        }
        return Ok(());
    }

    let runs = store.runs.list(tenant_id, None, true, 50, 0).await?;
    if runs.is_empty() {
        println!("{} No runs found", style("!").yellow());
        return Ok(());
    }

    for run in runs {
        println!(
            "{:<36} {:<10} {:<8} {:>3}% {}",
            run.id,
            run.tenant_id,
            run.status.as_str(),
            run.progress,
            run.current_stage.as_str()
        );
    }

    Ok(())
}

//! Shared setup used by every subcommand: load `PipelineSettings` from the
//! environment, ensure its directories exist, and open a migrated `Store`.

use pipeline_core::config::PipelineSettings;
use pipeline_core::repository::Store;

/// One of the five Stage Processors, or the Batch Coordinator. `Serve`
/// selects a subset of these so a deployment can scale AI-bound stages
/// (parse, categorize) independently of CPU-bound ones (extract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StageKind {
    Extract,
    Parse,
    Categorize,
    Coordinate,
    Similarity,
    Split,
}

pub async fn load_settings_and_store() -> anyhow::Result<(PipelineSettings, Store)> {
    let settings = PipelineSettings::from_env();
    settings.ensure_directories()?;

    let store = Store::from_url(&settings.database_url(), settings.no_tls)?;
    store.migrate(settings.no_tls).await?;

    Ok((settings, store))
}

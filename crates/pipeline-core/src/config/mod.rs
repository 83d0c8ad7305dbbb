//! Process-wide configuration, loaded from the environment (`BATCH_SIZE`,
//! `MAX_BATCHES`, `COORDINATOR_POLL_INTERVAL_MS`, ...).

mod settings;

pub use settings::PipelineSettings;

/// Default SQLite database filename under `data_dir`.
pub const DEFAULT_DATABASE_FILENAME: &str = "pipeline.db";

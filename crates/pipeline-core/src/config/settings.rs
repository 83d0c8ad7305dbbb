//! `PipelineSettings` — every environment-tunable knob the orchestrator,
//! stage runners, and stage processors read at startup. Constructed once in
//! a process's composition root and threaded down as an explicit dependency;
//! nothing here is a lazily-initialized global.

use std::path::PathBuf;
use std::time::Duration;

use super::DEFAULT_DATABASE_FILENAME;

/// Process-wide configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Base data directory (holds the SQLite file when no `database_url` is set).
    pub data_dir: PathBuf,
    pub database_filename: String,
    /// Overrides `data_dir`/`database_filename` when set. `sqlite:` or
    /// `postgres(ql)?:` URL.
    pub database_url: Option<String>,
    pub no_tls: bool,

    /// `{UPLOAD_DIR}/{tenantId}/{runId}/` — one PDF per input file.
    pub upload_dir: PathBuf,
    /// `{OUTPUT_DIR}/{tenantId}/{runId}/...` — stage artifacts.
    pub output_dir: PathBuf,

    /// Fan-out threshold: submissions with more inputs than this become a
    /// batch (parent + children) rather than a standalone run.
    pub batch_size: u32,
    /// Admission ceiling: `batch_size * max_batches` inputs is the most a
    /// single submission may contain.
    pub max_batches: u32,

    pub coordinator_poll_interval: Duration,
    pub coordinator_timeout: Duration,
    pub similarity_timeout: Duration,

    /// Default concurrent leases per stage runner.
    pub worker_concurrency: usize,

    /// Process-wide fallback AI credential, used when a tenant has none of
    /// its own. Parse/Categorize fail the job if neither is present.
    pub default_ai_credential: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pipeline");

        Self {
            upload_dir: data_dir.join("uploads"),
            output_dir: data_dir.join("output"),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            no_tls: false,
            batch_size: 30,
            max_batches: 20,
            coordinator_poll_interval: Duration::from_secs(10),
            coordinator_timeout: Duration::from_secs(4 * 60 * 60),
            similarity_timeout: Duration::from_secs(60 * 60),
            worker_concurrency: 3,
            default_ai_credential: None,
        }
    }
}

impl PipelineSettings {
    /// Load from the environment, falling back to spec defaults for anything
    /// unset. `DATABASE_URL`, `UPLOAD_DIR`, `OUTPUT_DIR`, and the AI
    /// credential env var are read raw; the rest are `u64` millisecond/count
    /// knobs parsed with a default fallback on missing or malformed values.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            no_tls: env_bool("PIPELINE_NO_TLS", defaults.no_tls),
            upload_dir: env_path("UPLOAD_DIR", defaults.upload_dir),
            output_dir: env_path("OUTPUT_DIR", defaults.output_dir),
            batch_size: env_u32("BATCH_SIZE", defaults.batch_size),
            max_batches: env_u32("MAX_BATCHES", defaults.max_batches),
            coordinator_poll_interval: env_millis(
                "COORDINATOR_POLL_INTERVAL_MS",
                defaults.coordinator_poll_interval,
            ),
            coordinator_timeout: env_millis("COORDINATOR_TIMEOUT_MS", defaults.coordinator_timeout),
            similarity_timeout: env_millis("SIMILARITY_TIMEOUT_MS", defaults.similarity_timeout),
            worker_concurrency: env_u32("WORKER_CONCURRENCY", defaults.worker_concurrency as u32)
                as usize,
            default_ai_credential: std::env::var("AI_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            ..defaults
        }
    }

    /// The database URL, constructing one from `data_dir`/`database_filename`
    /// if none was explicitly configured.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => {
                let path = self.data_dir.join(&self.database_filename);
                format!("sqlite:{}", path.display())
            }
        }
    }

    pub fn is_postgres(&self) -> bool {
        self.database_url
            .as_deref()
            .is_some_and(crate::repository::pool::is_postgres_url)
    }

    /// Largest number of inputs a single submission may contain before
    /// admission rejects it outright.
    pub fn max_admissible_inputs(&self) -> u32 {
        self.batch_size * self.max_batches
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Per-run upload directory: `{UPLOAD_DIR}/{tenant_id}/{run_id}/`.
    pub fn upload_dir_for(&self, tenant_id: &str, run_id: &str) -> PathBuf {
        self.upload_dir.join(tenant_id).join(run_id)
    }

    /// Per-run output directory: `{OUTPUT_DIR}/{tenant_id}/{run_id}/`.
    pub fn output_dir_for(&self, tenant_id: &str, run_id: &str) -> PathBuf {
        self.output_dir.join(tenant_id).join(run_id)
    }
}

fn env_path(var: &str, default: PathBuf) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or(default)
}

fn env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

fn env_u32(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = PipelineSettings::default();
        assert_eq!(s.batch_size, 30);
        assert_eq!(s.max_batches, 20);
        assert_eq!(s.max_admissible_inputs(), 600);
        assert_eq!(s.worker_concurrency, 3);
        assert_eq!(s.coordinator_timeout, Duration::from_secs(4 * 60 * 60));
        assert_eq!(s.similarity_timeout, Duration::from_secs(60 * 60));
    }
}

//! Command-line interface for the pipeline orchestrator.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::StageKind;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "PDF question-bank extraction and categorization orchestrator")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup, before clap parses).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run stage-runner workers and the batch coordinator against the queue
    Serve {
        /// Which stages this process serves. Defaults to all five plus the
        /// coordinator, so a deployment can instead scale AI-bound stages
        /// (parse, categorize) independently of CPU-bound ones (extract).
        #[arg(long, value_enum)]
        stage: Vec<StageKind>,

        /// Concurrent leases per stage, overriding WORKER_CONCURRENCY.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Submit PDF files and/or URLs for processing under a tenant
    Submit {
        /// Tenant ID the run belongs to
        tenant_id: String,

        /// Local PDF file paths to upload
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// URLs to fetch PDFs from
        #[arg(long = "url")]
        urls: Vec<String>,
    },

    /// Show the status of one run, or list a tenant's runs
    Status {
        /// Specific run ID to show
        run_id: Option<String>,

        /// List runs for this tenant instead of showing one run
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Cancel a running or queued run
    Cancel {
        run_id: String,
    },

    /// Restart a failed or completed run from the beginning
    Restart {
        run_id: String,
    },

    /// Merge two or more completed runs from the same tenant into one
    Merge {
        /// At least two run IDs to merge
        run_ids: Vec<String>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { stage, concurrency } => commands::serve::cmd_serve(stage, concurrency).await,
        Commands::Submit { tenant_id, files, urls } => commands::submit::cmd_submit(&tenant_id, files, urls).await,
        Commands::Status { run_id, tenant } => commands::status::cmd_status(run_id.as_deref(), tenant.as_deref()).await,
        Commands::Cancel { run_id } => commands::cancel::cmd_cancel(&run_id).await,
        Commands::Restart { run_id } => commands::restart::cmd_restart(&run_id).await,
        Commands::Merge { run_ids } => commands::merge::cmd_merge(&run_ids).await,
    }
}

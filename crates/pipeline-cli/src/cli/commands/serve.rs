//! `serve` — runs a Stage Runner per selected stage plus the Batch
//! Coordinator, all against the same queue/store, until Ctrl+C.

use std::sync::Arc;

use console::style;
use pipeline_core::queue::pipeline::PipelineEvent;
use pipeline_core::queue::stage_queue::DbStageQueue;
use pipeline_core::queue::stage_runner::{StageRunner, StageRunnerConfig};
use pipeline_orchestrator::Chainer;
use pipeline_stages::collaborators::{HttpAiClient, PopplerRasterizer, SubprocessSimilarityEngine};
use pipeline_stages::{CategorizeProcessor, ExtractProcessor, ParseProcessor, SimilarityProcessor, SplitProcessor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{load_settings_and_store, StageKind};

const DEFAULT_STAGES: &[StageKind] = &[
    StageKind::Extract,
    StageKind::Parse,
    StageKind::Categorize,
    StageKind::Coordinate,
    StageKind::Similarity,
    StageKind::Split,
];

pub async fn cmd_serve(stages: Vec<StageKind>, concurrency: Option<usize>) -> anyhow::Result<()> {
    let (settings, store) = load_settings_and_store().await?;
    let stages = if stages.is_empty() { DEFAULT_STAGES.to_vec() } else { stages };
    let max_concurrent_leases = concurrency.unwrap_or(settings.worker_concurrency);

    let queue = Arc::new(DbStageQueue::new(store.pool().clone()));
    let chainer = Arc::new(Chainer::new(store.clone(), queue.clone(), settings.clone()));

    let ai_endpoint = std::env::var("AI_ENDPOINT").unwrap_or_else(|_| "https://api.example.invalid/v1/generate".to_string());
    let ai_model = std::env::var("AI_MODEL").unwrap_or_else(|_| "default".to_string());
    let ai_client = Arc::new(HttpAiClient::new(ai_endpoint, ai_model));

    let similarity_bin = std::env::var("SIMILARITY_ENGINE_BIN").unwrap_or_else(|_| "similarity-engine".to_string());
    let similarity_engine = Arc::new(SubprocessSimilarityEngine::new(similarity_bin));
    let rasterizer = Arc::new(PopplerRasterizer::new());

    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(256);

    let event_logger = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::debug!(?event, "pipeline event");
        }
    });

    let mut tasks = tokio::task::JoinSet::new();

    let config_for = |consumer_group: &str, lease_visibility: std::time::Duration| StageRunnerConfig {
        consumer_group: consumer_group.to_string(),
        max_concurrent_leases,
        lease_visibility,
        ..StageRunnerConfig::default()
    };

    for stage in &stages {
        let cancel = cancel.clone();
        let event_tx = event_tx.clone();
        let queue = queue.clone();

        match stage {
            StageKind::Extract => {
                let processor = Arc::new(ExtractProcessor::new(store.clone(), chainer.clone(), rasterizer.clone()));
                let runner = StageRunner::new(queue, processor, store.clone(), config_for("extract-worker", std::time::Duration::from_secs(10 * 60)));
                tasks.spawn(async move { runner.run(cancel, event_tx).await });
            }
            StageKind::Parse => {
                let processor = Arc::new(ParseProcessor::new(store.clone(), chainer.clone(), ai_client.clone(), settings.clone()));
                let runner = StageRunner::new(queue, processor, store.clone(), config_for("parse-worker", std::time::Duration::from_secs(10 * 60)));
                tasks.spawn(async move { runner.run(cancel, event_tx).await });
            }
            StageKind::Categorize => {
                let processor = Arc::new(CategorizeProcessor::new(store.clone(), chainer.clone(), ai_client.clone(), settings.clone()));
                let runner = StageRunner::new(queue, processor, store.clone(), config_for("categorize-worker", std::time::Duration::from_secs(10 * 60)));
                tasks.spawn(async move { runner.run(cancel, event_tx).await });
            }
            StageKind::Coordinate => {
                let processor = Arc::new(pipeline_orchestrator::CoordinateProcessor::new(
                    store.clone(),
                    queue.clone(),
                    settings.clone(),
                ));
                let runner = StageRunner::new(queue, processor, store.clone(), config_for("coordinate-worker", settings.coordinator_timeout));
                tasks.spawn(async move { runner.run(cancel, event_tx).await });
            }
            StageKind::Similarity => {
                let processor = Arc::new(SimilarityProcessor::new(store.clone(), chainer.clone(), similarity_engine.clone(), settings.clone()));
                let runner = StageRunner::new(queue, processor, store.clone(), config_for("similarity-worker", settings.similarity_timeout));
                tasks.spawn(async move { runner.run(cancel, event_tx).await });
            }
            StageKind::Split => {
                let processor = Arc::new(SplitProcessor::new(store.clone(), chainer.clone()));
                let runner = StageRunner::new(queue, processor, store.clone(), config_for("split-worker", std::time::Duration::from_secs(10 * 60)));
                tasks.spawn(async move { runner.run(cancel, event_tx).await });
            }
        }
    }

    drop(event_tx);

    println!(
        "{} Serving stages {:?} (concurrency {})",
        style("→").cyan(),
        stages,
        max_concurrent_leases
    );
    println!("  Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("{} Shutting down, waiting for in-flight jobs...", style("→").cyan());
            cancel.cancel();
        }
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "stage runner task panicked");
        }
    }
    let _ = event_logger.await;

    println!("{} Stopped", style("✓").green());
    Ok(())
}

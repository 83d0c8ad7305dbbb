//! Stage Runner — a persistent worker loop that holds up to N concurrent
//! leases against one [`Queue`] stage, extending each lease on a heartbeat
//! interval and cooperatively shutting down on cancellation. Unlike a
//! one-shot batch driver that drains a finite amount of work to completion
//! inside a single invocation, `StageRunner` runs forever against a live
//! queue, processing leases as they arrive and only stopping when told to.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::payloads::HasRunId;
use super::pipeline::PipelineEvent;
use super::stage_queue::{Lease, Queue};
use crate::models::{RunStatus, Stage};
use crate::repository::pool::DieselError;
use crate::repository::Store;

/// One processor invocation's outcome, reported back to the runner.
pub enum Outcome {
    Ack,
    /// Transient failure — requeue with `retry_delay` as the next visibility
    /// offset, or dead-letter if `max_attempts` has been reached.
    Nack { retry_delay: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum StageRunnerError {
    #[error("queue error: {0}")]
    Queue(#[from] DieselError),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Shared between the Stage Runner's heartbeat and the in-flight processor.
/// The heartbeat extends the lease, mirrors `progress` onto the job row, and
/// watches the run for an admin `cancel`; the processor reports its own
/// completion fraction through `report_progress` and checks `is_cancelled`
/// at its cooperative yield points, bailing out via [`Outcome`] without
/// finishing the rest of its work when it observes cancellation.
#[derive(Clone)]
pub struct StageContext {
    cancel: CancellationToken,
    progress: Arc<AtomicU8>,
}

impl StageContext {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report_progress(&self, value: u8) {
        self.progress.store(value.min(100), Ordering::Relaxed);
    }

    fn current_progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }
}

/// Implemented by each stage's processor (Extract/Parse/Categorize/
/// Similarity/Split). The runner supplies leasing, heartbeat, and retry
/// routing; the processor only does the domain work for one item.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    type Payload: Serialize + DeserializeOwned + Send + Sync + HasRunId + 'static;

    fn stage_name(&self) -> &str;

    async fn process(
        &self,
        lease: &Lease<Self::Payload>,
        ctx: &StageContext,
    ) -> Result<Outcome, StageRunnerError>;
}

pub struct StageRunnerConfig {
    pub consumer_group: String,
    pub max_concurrent_leases: usize,
    pub lease_visibility: Duration,
    /// Heartbeat fires at `lease_visibility / heartbeat_divisor` so a lease
    /// is extended well before it would otherwise expire.
    pub heartbeat_divisor: u32,
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for StageRunnerConfig {
    fn default() -> Self {
        Self {
            consumer_group: "default".to_string(),
            max_concurrent_leases: 4,
            lease_visibility: Duration::from_secs(10 * 60),
            heartbeat_divisor: 3,
            max_attempts: 3,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Drives one [`StageProcessor`] against a [`Queue`], holding up to
/// `max_concurrent_leases` in flight at once.
pub struct StageRunner<Q, P> {
    queue: Arc<Q>,
    processor: Arc<P>,
    store: Store,
    config: StageRunnerConfig,
}

impl<Q, P> StageRunner<Q, P>
where
    Q: Queue + 'static,
    P: StageProcessor + 'static,
{
    pub fn new(queue: Arc<Q>, processor: Arc<P>, store: Store, config: StageRunnerConfig) -> Self {
        Self {
            queue,
            processor,
            store,
            config,
        }
    }

    /// Run until `cancel` fires. Leases already in flight are allowed to
    /// finish (ack/nack) before this returns — new leases stop being taken
    /// as soon as cancellation is observed.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        event_tx: mpsc::Sender<PipelineEvent>,
    ) -> Result<(), StageRunnerError> {
        let stage = self.processor.stage_name().to_string();
        let mut in_flight = tokio::task::JoinSet::new();

        loop {
            if cancel.is_cancelled() && in_flight.is_empty() {
                break;
            }

            let capacity = self
                .config
                .max_concurrent_leases
                .saturating_sub(in_flight.len());

            if !cancel.is_cancelled() && capacity > 0 {
                let leased: Vec<Lease<P::Payload>> = self
                    .queue
                    .lease(
                        &stage,
                        &self.config.consumer_group,
                        capacity,
                        self.config.lease_visibility,
                    )
                    .await?;

                for lease in leased {
                    let _ = event_tx
                        .send(PipelineEvent::ItemStarted {
                            stage: stage.clone(),
                            item_id: lease.message_id.clone(),
                            label: lease.partition_key.clone(),
                        })
                        .await;

                    let queue = Arc::clone(&self.queue);
                    let processor = Arc::clone(&self.processor);
                    let store = self.store.clone();
                    let max_attempts = self.config.max_attempts;
                    let heartbeat_every =
                        self.config.lease_visibility / self.config.heartbeat_divisor.max(1);
                    let lease_visibility = self.config.lease_visibility;
                    let consumer_group = self.config.consumer_group.clone();
                    let tx = event_tx.clone();
                    let stage_name = stage.clone();

                    in_flight.spawn(async move {
                        run_one_lease(
                            queue,
                            processor,
                            store,
                            lease,
                            max_attempts,
                            heartbeat_every,
                            lease_visibility,
                            consumer_group,
                            tx,
                            stage_name,
                        )
                        .await
                    });
                }

                if capacity > 0 && in_flight.is_empty() {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }

            // Reap any finished leases without blocking the next lease poll.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(stage = %stage, error = %e, "stage worker task panicked");
                }
            }

            if cancel.is_cancelled() {
                // Drain remaining in-flight work before exiting.
                while let Some(joined) = in_flight.join_next().await {
                    if let Err(e) = joined {
                        tracing::error!(stage = %stage, error = %e, "stage worker task panicked");
                    }
                }
                break;
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one_lease<Q, P>(
    queue: Arc<Q>,
    processor: Arc<P>,
    store: Store,
    lease: Lease<P::Payload>,
    max_attempts: u32,
    heartbeat_every: Duration,
    lease_visibility: Duration,
    consumer_group: String,
    event_tx: mpsc::Sender<PipelineEvent>,
    stage: String,
) where
    Q: Queue + 'static,
    P: StageProcessor + 'static,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let message_id = lease.message_id.clone();
    let run_id = lease.payload.run_id().to_string();
    let stage_kind = Stage::from_str(&stage);
    let ctx = StageContext::new();

    let heartbeat_queue = Arc::clone(&queue);
    let heartbeat_id = message_id.clone();
    let heartbeat_group = consumer_group.clone();
    let heartbeat_store = store.clone();
    let heartbeat_ctx = ctx.clone();
    let heartbeat = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(heartbeat_every) => {
                    if let Err(e) = heartbeat_queue
                        .extend(&heartbeat_id, &heartbeat_group, lease_visibility)
                        .await
                    {
                        tracing::warn!(message_id = %heartbeat_id, error = %e, "lease heartbeat failed");
                    }

                    if let Some(stage_kind) = stage_kind {
                        if let Ok(Some(job)) = heartbeat_store.jobs.latest_for_stage(&run_id, stage_kind).await {
                            let _ = heartbeat_store
                                .jobs
                                .update_progress(&job.id, heartbeat_ctx.current_progress())
                                .await;
                        }
                    }

                    match heartbeat_store.runs.get(&run_id).await {
                        Ok(Some(run)) if run.status == RunStatus::Cancelled => {
                            heartbeat_ctx.cancel.cancel();
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(run_id = %run_id, error = %e, "heartbeat cancellation check failed");
                        }
                        _ => {}
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    });

    let result = processor.process(&lease, &ctx).await;
    let _ = stop_tx.send(true);
    let _ = heartbeat.await;

    match result {
        Ok(Outcome::Ack) => {
            if let Err(e) = queue.ack(&message_id, &consumer_group).await {
                tracing::error!(message_id = %message_id, error = %e, "ack failed");
            }
            let _ = event_tx
                .send(PipelineEvent::ItemCompleted {
                    stage,
                    item_id: message_id,
                    detail: None,
                })
                .await;
        }
        Ok(Outcome::Nack { retry_delay }) => {
            if let Err(e) = queue
                .nack(&message_id, &consumer_group, retry_delay, max_attempts)
                .await
            {
                tracing::error!(message_id = %message_id, error = %e, "nack failed");
            }
            let _ = event_tx
                .send(PipelineEvent::ItemFailed {
                    stage,
                    item_id: message_id,
                    error: "requeued".to_string(),
                })
                .await;
        }
        Err(e) => {
            let _ = queue
                .nack(&message_id, &consumer_group, Duration::from_secs(30), max_attempts)
                .await;
            let _ = event_tx
                .send(PipelineEvent::ItemFailed {
                    stage,
                    item_id: message_id,
                    error: e.to_string(),
                })
                .await;
        }
    }
}

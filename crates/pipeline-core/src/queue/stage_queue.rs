//! The durable, visibility-timeout based queue described by the Queue
//! component: `enqueue` / `lease` / `extend` / `ack` / `nack` against
//! `stage_queue_messages`.
//!
//! This is deliberately a different vocabulary from [`super::WorkQueue`]:
//! `WorkQueue` models a single claim-and-release cycle driven by the runner
//! polling a table of domain rows directly, while `Queue` models a proper
//! message queue semantic (opaque payload, lease ownership, heartbeat
//! extension) on top of one shared table used by every stage.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{de::DeserializeOwned, Serialize};

use crate::repository::pool::{DbPool, DieselError};
use crate::schema::stage_queue_messages;
use crate::with_conn;

/// A leased message, ready to be processed. `Drop` performs no cleanup —
/// callers must explicitly `ack`/`nack`/`extend` the lease before it expires,
/// the same “consume or warn” posture as [`super::WorkHandle`], but here the
/// row itself (not an in-memory guard) is the source of truth, so a process
/// crash just lets the lease lapse and another worker re-leases it.
#[derive(Debug, Clone)]
pub struct Lease<T> {
    pub message_id: String,
    pub stage: String,
    pub partition_key: String,
    pub attempt: u32,
    pub payload: T,
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a new message for `stage`, partitioned by `partition_key`
    /// (messages sharing a key are never leased to two consumers at once —
    /// see the per-run ordering requirement in the Queue component).
    async fn enqueue<T: Serialize + Send + Sync>(
        &self,
        stage: &str,
        partition_key: &str,
        payload: &T,
    ) -> Result<String, DieselError>;

    /// Lease up to `max` messages visible as of now for `stage`, owned by
    /// `consumer_group`, hiding them from other consumers for `visibility`.
    async fn lease<T: DeserializeOwned + Send + Sync>(
        &self,
        stage: &str,
        consumer_group: &str,
        max: usize,
        visibility: std::time::Duration,
    ) -> Result<Vec<Lease<T>>, DieselError>;

    /// Push a lease's visibility deadline out further (heartbeat).
    async fn extend(
        &self,
        message_id: &str,
        consumer_group: &str,
        visibility: std::time::Duration,
    ) -> Result<(), DieselError>;

    /// Mark a message permanently done.
    async fn ack(&self, message_id: &str, consumer_group: &str) -> Result<(), DieselError>;

    /// Return a message to the queue (or dead-letter it after too many
    /// attempts). `retry_delay` is applied as the next visibility offset.
    async fn nack(
        &self,
        message_id: &str,
        consumer_group: &str,
        retry_delay: std::time::Duration,
        max_attempts: u32,
    ) -> Result<(), DieselError>;
}

#[derive(Queryable, Debug, Clone)]
struct MessageRow {
    id: String,
    stage: String,
    partition_key: String,
    #[allow(dead_code)]
    consumer_group: String,
    payload: String,
    #[allow(dead_code)]
    status: String,
    attempt: i32,
    #[allow(dead_code)]
    visible_at: String,
    #[allow(dead_code)]
    lease_owner: Option<String>,
    #[allow(dead_code)]
    created_at: String,
    #[allow(dead_code)]
    updated_at: String,
}

/// Diesel-backed [`Queue`] over `stage_queue_messages`, usable with either
/// SQLite (single-process dev/test) or PostgreSQL (multi-worker production).
#[derive(Clone)]
pub struct DbStageQueue {
    pool: DbPool,
}

impl DbStageQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn offset_rfc3339(d: std::time::Duration) -> String {
    let dur = ChronoDuration::from_std(d).unwrap_or(ChronoDuration::zero());
    (Utc::now() + dur).to_rfc3339()
}

#[async_trait]
impl Queue for DbStageQueue {
    async fn enqueue<T: Serialize + Send + Sync>(
        &self,
        stage: &str,
        partition_key: &str,
        payload: &T,
    ) -> Result<String, DieselError> {
        let id = uuid::Uuid::new_v4().to_string();
        let payload_str = serde_json::to_string(payload)
            .map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))?;
        let now = now_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::insert_into(stage_queue_messages::table)
                .values((
                    stage_queue_messages::id.eq(&id),
                    stage_queue_messages::stage.eq(stage),
                    stage_queue_messages::partition_key.eq(partition_key),
                    stage_queue_messages::consumer_group.eq(""),
                    stage_queue_messages::payload.eq(&payload_str),
                    stage_queue_messages::status.eq("pending"),
                    stage_queue_messages::attempt.eq(0),
                    stage_queue_messages::visible_at.eq(&now),
                    stage_queue_messages::lease_owner.eq(None::<String>),
                    stage_queue_messages::created_at.eq(&now),
                    stage_queue_messages::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
        })?;

        Ok(id)
    }

    async fn lease<T: DeserializeOwned + Send + Sync>(
        &self,
        stage: &str,
        consumer_group: &str,
        max: usize,
        visibility: std::time::Duration,
    ) -> Result<Vec<Lease<T>>, DieselError> {
        let now = now_rfc3339();
        let visible_until = offset_rfc3339(visibility);
        let owner = consumer_group.to_string();

        // Two-phase claim: select eligible rows, then flip them to `leased`
        // one at a time filtered on the row still being eligible, so two
        // workers racing the same poll don't both win the same message.
        // Within a single partition_key, only the oldest eligible message is
        // offered, so ordered processing for a run is never violated.
        let candidates: Vec<MessageRow> = with_conn!(self.pool, conn, {
            stage_queue_messages::table
                .filter(stage_queue_messages::stage.eq(stage))
                .filter(stage_queue_messages::status.eq_any(["pending", "leased"]))
                .filter(stage_queue_messages::visible_at.le(&now))
                .order(stage_queue_messages::visible_at.asc())
                .limit((max as i64) * 4)
                .load(&mut conn)
                .await
        })?;

        let mut seen_partitions = std::collections::HashSet::new();
        let mut leased = Vec::with_capacity(max);

        for row in candidates {
            if leased.len() >= max {
                break;
            }
            if !seen_partitions.insert(row.partition_key.clone()) {
                continue;
            }

            let rows_updated = with_conn!(self.pool, conn, {
                diesel::update(
                    stage_queue_messages::table
                        .filter(stage_queue_messages::id.eq(&row.id))
                        .filter(stage_queue_messages::status.eq_any(["pending", "leased"]))
                        .filter(stage_queue_messages::visible_at.le(&now)),
                )
                .set((
                    stage_queue_messages::status.eq("leased"),
                    stage_queue_messages::consumer_group.eq(&owner),
                    stage_queue_messages::attempt.eq(row.attempt + 1),
                    stage_queue_messages::visible_at.eq(&visible_until),
                    stage_queue_messages::lease_owner.eq(Some(owner.clone())),
                    stage_queue_messages::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
            })?;

            if rows_updated == 0 {
                continue; // another consumer won the race
            }

            let payload: T = serde_json::from_str(&row.payload)
                .map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?;

            leased.push(Lease {
                message_id: row.id,
                stage: row.stage,
                partition_key: row.partition_key,
                attempt: (row.attempt + 1) as u32,
                payload,
            });
        }

        Ok(leased)
    }

    async fn extend(
        &self,
        message_id: &str,
        consumer_group: &str,
        visibility: std::time::Duration,
    ) -> Result<(), DieselError> {
        let visible_until = offset_rfc3339(visibility);
        let now = now_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                stage_queue_messages::table
                    .filter(stage_queue_messages::id.eq(message_id))
                    .filter(stage_queue_messages::consumer_group.eq(consumer_group))
                    .filter(stage_queue_messages::status.eq("leased")),
            )
            .set((
                stage_queue_messages::visible_at.eq(&visible_until),
                stage_queue_messages::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })?;
        Ok(())
    }

    async fn ack(&self, message_id: &str, consumer_group: &str) -> Result<(), DieselError> {
        let now = now_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                stage_queue_messages::table
                    .filter(stage_queue_messages::id.eq(message_id))
                    .filter(stage_queue_messages::consumer_group.eq(consumer_group)),
            )
            .set((
                stage_queue_messages::status.eq("completed"),
                stage_queue_messages::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })?;
        Ok(())
    }

    async fn nack(
        &self,
        message_id: &str,
        consumer_group: &str,
        retry_delay: std::time::Duration,
        max_attempts: u32,
    ) -> Result<(), DieselError> {
        let now = now_rfc3339();

        let row: Option<MessageRow> = with_conn!(self.pool, conn, {
            stage_queue_messages::table
                .filter(stage_queue_messages::id.eq(message_id))
                .first(&mut conn)
                .await
                .optional()
        })?;

        let Some(row) = row else {
            return Ok(());
        };

        if row.attempt as u32 >= max_attempts {
            with_conn!(self.pool, conn, {
                diesel::update(
                    stage_queue_messages::table
                        .filter(stage_queue_messages::id.eq(message_id))
                        .filter(stage_queue_messages::consumer_group.eq(consumer_group)),
                )
                .set((
                    stage_queue_messages::status.eq("dead_letter"),
                    stage_queue_messages::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
            })?;
            return Ok(());
        }

        let next_visible = offset_rfc3339(retry_delay);
        with_conn!(self.pool, conn, {
            diesel::update(
                stage_queue_messages::table
                    .filter(stage_queue_messages::id.eq(message_id))
                    .filter(stage_queue_messages::consumer_group.eq(consumer_group)),
            )
            .set((
                stage_queue_messages::status.eq("pending"),
                stage_queue_messages::visible_at.eq(&next_visible),
                stage_queue_messages::lease_owner.eq(None::<String>),
                stage_queue_messages::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })?;
        Ok(())
    }
}

//! PipelineJob repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{DbPool, DieselError};
use crate::models::{JobStatus, PipelineJob, Stage};
use crate::schema::pipeline_jobs;
use crate::with_conn;

#[derive(Queryable, Debug, Clone)]
struct JobRow {
    id: String,
    pipeline_run_id: String,
    stage: String,
    status: String,
    progress: i32,
    external_job_id: Option<String>,
    error_message: Option<String>,
    result: Option<String>,
    attempt: i32,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn into_domain(self) -> PipelineJob {
        PipelineJob {
            id: self.id,
            pipeline_run_id: self.pipeline_run_id,
            stage: Stage::from_str(&self.stage).unwrap_or(Stage::Extract),
            status: JobStatus::from_str(&self.status).unwrap_or(JobStatus::Pending),
            progress: self.progress.clamp(0, 100) as u8,
            external_job_id: self.external_job_id,
            error_message: self.error_message,
            result: self.result.and_then(|s| serde_json::from_str(&s).ok()),
            attempt: self.attempt as u32,
            created_at: super::parse_datetime(&self.created_at),
            started_at: super::parse_datetime_opt(self.started_at),
            completed_at: super::parse_datetime_opt(self.completed_at),
        }
    }
}

#[derive(Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job: &PipelineJob) -> Result<(), DieselError> {
        let created_at = job.created_at.to_rfc3339();
        let result = job
            .result
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());

        with_conn!(self.pool, conn, {
            diesel::insert_into(pipeline_jobs::table)
                .values((
                    pipeline_jobs::id.eq(&job.id),
                    pipeline_jobs::pipeline_run_id.eq(&job.pipeline_run_id),
                    pipeline_jobs::stage.eq(job.stage.as_str()),
                    pipeline_jobs::status.eq(job.status.as_str()),
                    pipeline_jobs::progress.eq(job.progress as i32),
                    pipeline_jobs::external_job_id.eq(&job.external_job_id),
                    pipeline_jobs::error_message.eq(&job.error_message),
                    pipeline_jobs::result.eq(&result),
                    pipeline_jobs::attempt.eq(job.attempt as i32),
                    pipeline_jobs::created_at.eq(&created_at),
                    pipeline_jobs::started_at.eq(job.started_at.map(|t| t.to_rfc3339())),
                    pipeline_jobs::completed_at.eq(job.completed_at.map(|t| t.to_rfc3339())),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// The most recent job for `(run_id, stage)` — earlier retries are kept
    /// for audit but are not authoritative.
    pub async fn latest_for_stage(
        &self,
        run_id: &str,
        stage: Stage,
    ) -> Result<Option<PipelineJob>, DieselError> {
        let row: Option<JobRow> = with_conn!(self.pool, conn, {
            pipeline_jobs::table
                .filter(pipeline_jobs::pipeline_run_id.eq(run_id))
                .filter(pipeline_jobs::stage.eq(stage.as_str()))
                .order(pipeline_jobs::created_at.desc())
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(row.map(JobRow::into_domain))
    }

    pub async fn list_for_run(&self, run_id: &str) -> Result<Vec<PipelineJob>, DieselError> {
        let rows: Vec<JobRow> = with_conn!(self.pool, conn, {
            pipeline_jobs::table
                .filter(pipeline_jobs::pipeline_run_id.eq(run_id))
                .order(pipeline_jobs::created_at.asc())
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(JobRow::into_domain).collect())
    }

    pub async fn mark_active(&self, job_id: &str, external_job_id: Option<&str>) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(pipeline_jobs::table.filter(pipeline_jobs::id.eq(job_id)))
                .set((
                    pipeline_jobs::status.eq(JobStatus::Active.as_str()),
                    pipeline_jobs::external_job_id.eq(external_job_id),
                    pipeline_jobs::started_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Mirrors a live in-progress fraction onto the job row — called by the
    /// Stage Runner's heartbeat, not by processors directly.
    pub async fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(pipeline_jobs::table.filter(pipeline_jobs::id.eq(job_id)))
                .set(pipeline_jobs::progress.eq(progress as i32))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    pub async fn mark_completed(
        &self,
        job_id: &str,
        result: Option<&serde_json::Value>,
    ) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        let result_str = result.map(|v| serde_json::to_string(v).unwrap_or_default());
        with_conn!(self.pool, conn, {
            diesel::update(pipeline_jobs::table.filter(pipeline_jobs::id.eq(job_id)))
                .set((
                    pipeline_jobs::status.eq(JobStatus::Completed.as_str()),
                    pipeline_jobs::progress.eq(100),
                    pipeline_jobs::result.eq(&result_str),
                    pipeline_jobs::completed_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Removes every job row for a run — part of the cascade a run `delete`
    /// or a batch-parent restart performs before repeating fan-out.
    pub async fn delete_for_run(&self, run_id: &str) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::delete(pipeline_jobs::table.filter(pipeline_jobs::pipeline_run_id.eq(run_id)))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    pub async fn mark_failed(&self, job_id: &str, error: &str, retrying: bool) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        let status = if retrying {
            JobStatus::Retrying
        } else {
            JobStatus::Failed
        };
        with_conn!(self.pool, conn, {
            diesel::update(pipeline_jobs::table.filter(pipeline_jobs::id.eq(job_id)))
                .set((
                    pipeline_jobs::status.eq(status.as_str()),
                    pipeline_jobs::error_message.eq(error),
                    pipeline_jobs::completed_at.eq(if retrying { None::<String> } else { Some(now) }),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }
}

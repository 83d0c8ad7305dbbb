//! PipelineRun repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{DbPool, DieselError};
use crate::models::{PipelineRun, RunStatus, Stage};
use crate::schema::pipeline_runs;
use crate::with_conn;

#[derive(Queryable, Debug, Clone)]
struct RunRow {
    id: String,
    tenant_id: String,
    input_files: String,
    source_urls: String,
    status: String,
    current_stage: String,
    progress: i32,
    error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    parent_run_id: Option<String>,
    batch_index: Option<i32>,
    batch_size: Option<i32>,
    total_batches: Option<i32>,
    total_items: i32,
    processed_items: i32,
    total_questions: i32,
}

impl RunRow {
    fn into_domain(self) -> PipelineRun {
        PipelineRun {
            id: self.id,
            tenant_id: self.tenant_id,
            input_files: serde_json::from_str(&self.input_files).unwrap_or_default(),
            source_urls: serde_json::from_str(&self.source_urls).unwrap_or_default(),
            status: RunStatus::from_str(&self.status).unwrap_or(RunStatus::Queued),
            current_stage: Stage::from_str(&self.current_stage).unwrap_or(Stage::Extract),
            progress: self.progress.clamp(0, 100) as u8,
            error: self.error,
            created_at: super::parse_datetime(&self.created_at),
            started_at: super::parse_datetime_opt(self.started_at),
            completed_at: super::parse_datetime_opt(self.completed_at),
            parent_run_id: self.parent_run_id,
            batch_index: self.batch_index.map(|v| v as u32),
            batch_size: self.batch_size.map(|v| v as u32),
            total_batches: self.total_batches.map(|v| v as u32),
            total_items: self.total_items as u32,
            processed_items: self.processed_items as u32,
            total_questions: self.total_questions as u32,
        }
    }
}

fn row_values(run: &PipelineRun) -> impl AsChangeset<Target = pipeline_runs::table> + '_ {
    (
        pipeline_runs::status.eq(run.status.as_str()),
        pipeline_runs::current_stage.eq(run.current_stage.as_str()),
        pipeline_runs::progress.eq(run.progress as i32),
        pipeline_runs::error.eq(&run.error),
        pipeline_runs::started_at.eq(run.started_at.map(|t| t.to_rfc3339())),
        pipeline_runs::completed_at.eq(run.completed_at.map(|t| t.to_rfc3339())),
        pipeline_runs::total_items.eq(run.total_items as i32),
        pipeline_runs::processed_items.eq(run.processed_items as i32),
        pipeline_runs::total_questions.eq(run.total_questions as i32),
    )
}

#[derive(Clone)]
pub struct RunRepository {
    pool: DbPool,
}

impl RunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>, DieselError> {
        let row: Option<RunRow> = with_conn!(self.pool, conn, {
            pipeline_runs::table
                .filter(pipeline_runs::id.eq(run_id))
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(row.map(RunRow::into_domain))
    }

    pub async fn children_of(&self, parent_run_id: &str) -> Result<Vec<PipelineRun>, DieselError> {
        let rows: Vec<RunRow> = with_conn!(self.pool, conn, {
            pipeline_runs::table
                .filter(pipeline_runs::parent_run_id.eq(parent_run_id))
                .order(pipeline_runs::batch_index.asc())
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(RunRow::into_domain).collect())
    }

    /// Runs a tenant currently has active (non-terminal), for the admission
    /// controller's `max_concurrent_pipelines` check. Child runs don't count
    /// against the parent's own slot usage — only top-level runs do.
    pub async fn count_active_for_tenant(&self, tenant_id: &str) -> Result<u64, DieselError> {
        use diesel::dsl::count_star;
        let count: i64 = with_conn!(self.pool, conn, {
            pipeline_runs::table
                .filter(pipeline_runs::tenant_id.eq(tenant_id))
                .filter(pipeline_runs::parent_run_id.is_null())
                .filter(
                    pipeline_runs::status
                        .eq_any(["queued", "running", "paused"]),
                )
                .select(count_star())
                .first(&mut conn)
                .await
        })?;
        Ok(count as u64)
    }

    pub async fn create(&self, run: &PipelineRun) -> Result<(), DieselError> {
        let input_files = serde_json::to_string(&run.input_files).unwrap_or_default();
        let source_urls = serde_json::to_string(&run.source_urls).unwrap_or_default();
        let created_at = run.created_at.to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::insert_into(pipeline_runs::table)
                .values((
                    pipeline_runs::id.eq(&run.id),
                    pipeline_runs::tenant_id.eq(&run.tenant_id),
                    pipeline_runs::input_files.eq(&input_files),
                    pipeline_runs::source_urls.eq(&source_urls),
                    pipeline_runs::status.eq(run.status.as_str()),
                    pipeline_runs::current_stage.eq(run.current_stage.as_str()),
                    pipeline_runs::progress.eq(run.progress as i32),
                    pipeline_runs::error.eq(&run.error),
                    pipeline_runs::created_at.eq(&created_at),
                    pipeline_runs::started_at.eq(run.started_at.map(|t| t.to_rfc3339())),
                    pipeline_runs::completed_at.eq(run.completed_at.map(|t| t.to_rfc3339())),
                    pipeline_runs::parent_run_id.eq(&run.parent_run_id),
                    pipeline_runs::batch_index.eq(run.batch_index.map(|v| v as i32)),
                    pipeline_runs::batch_size.eq(run.batch_size.map(|v| v as i32)),
                    pipeline_runs::total_batches.eq(run.total_batches.map(|v| v as i32)),
                    pipeline_runs::total_items.eq(run.total_items as i32),
                    pipeline_runs::processed_items.eq(run.processed_items as i32),
                    pipeline_runs::total_questions.eq(run.total_questions as i32),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    pub async fn save(&self, run: &PipelineRun) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(pipeline_runs::table.filter(pipeline_runs::id.eq(&run.id)))
                .set(row_values(run))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Atomically bump `progress`/`processed_items`; used by stage workers
    /// reporting incremental completion so concurrent updates don't clobber
    /// each other.
    pub async fn bump_progress(
        &self,
        run_id: &str,
        processed_delta: u32,
        progress: u8,
    ) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(pipeline_runs::table.filter(pipeline_runs::id.eq(run_id)))
                .set((
                    pipeline_runs::processed_items
                        .eq(pipeline_runs::processed_items + processed_delta as i32),
                    pipeline_runs::progress.eq(progress as i32),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Atomically bump `processed_items` and `total_questions` together and
    /// set `progress` — Extract's per-PDF increment, done as one update so a
    /// concurrent reader never observes the two counters out of step with
    /// each other.
    pub async fn bump_extract_progress(
        &self,
        run_id: &str,
        processed_delta: u32,
        questions_delta: u32,
        progress: u8,
    ) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(pipeline_runs::table.filter(pipeline_runs::id.eq(run_id)))
                .set((
                    pipeline_runs::processed_items
                        .eq(pipeline_runs::processed_items + processed_delta as i32),
                    pipeline_runs::total_questions
                        .eq(pipeline_runs::total_questions + questions_delta as i32),
                    pipeline_runs::progress.eq(progress as i32),
                ))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Paged, filtered listing for the admission surface's `list` operation.
    /// `parents_only` excludes batch children, matching the quota-check scope.
    pub async fn list(
        &self,
        tenant_id: Option<&str>,
        status: Option<RunStatus>,
        parents_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PipelineRun>, DieselError> {
        let rows: Vec<RunRow> = with_conn!(self.pool, conn, {
            let mut query = pipeline_runs::table.into_boxed();
            if let Some(tenant_id) = tenant_id {
                query = query.filter(pipeline_runs::tenant_id.eq(tenant_id.to_string()));
            }
            if let Some(status) = status {
                query = query.filter(pipeline_runs::status.eq(status.as_str()));
            }
            if parents_only {
                query = query.filter(pipeline_runs::parent_run_id.is_null());
            }
            query
                .order(pipeline_runs::created_at.desc())
                .limit(limit)
                .offset(offset)
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(RunRow::into_domain).collect())
    }

    /// Removes a run row. Callers are responsible for cascading to jobs,
    /// items, and filesystem directories first.
    pub async fn delete(&self, run_id: &str) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::delete(pipeline_runs::table.filter(pipeline_runs::id.eq(run_id)))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }
}

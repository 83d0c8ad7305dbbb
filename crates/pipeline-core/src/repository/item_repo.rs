//! Item repository — the tenant corpus. Backs the Corpus Merge: natural-key
//! upsert and full-tenant-set reads. The transactional envelope (serializable
//! isolation, 60s timeout, chunking) lives above this in the orchestrator;
//! this module only knows how to read and write rows.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use sea_query::{Expr, OnConflict, Query};

use super::pool::{build_sql, DbPool, DieselError};
use super::sea_tables::Items as ItemsIden;
use crate::models::{Categorization, Item};
use crate::schema::items;
use crate::with_conn;

#[derive(Queryable, Debug, Clone)]
struct ItemRow {
    tenant_id: String,
    file: String,
    pipeline_run_id: String,
    source_document_id: String,
    success: bool,
    parse_payload: String,
    categorization: Option<String>,
    similarity_group_id: Option<String>,
    marked_wrong: bool,
    marked_wrong_at: Option<String>,
}

impl ItemRow {
    fn into_domain(self) -> Item {
        Item {
            tenant_id: self.tenant_id,
            file: self.file,
            pipeline_run_id: self.pipeline_run_id,
            source_document_id: self.source_document_id,
            success: self.success,
            parse_payload: serde_json::from_str(&self.parse_payload).unwrap_or(serde_json::Value::Null),
            categorization: self
                .categorization
                .and_then(|s| serde_json::from_str::<Categorization>(&s).ok()),
            similarity_group_id: self.similarity_group_id,
            marked_wrong: self.marked_wrong,
            marked_wrong_at: super::parse_datetime_opt(self.marked_wrong_at),
        }
    }
}

#[derive(Clone)]
pub struct ItemRepository {
    pool: DbPool,
}

impl ItemRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The complete item set for one tenant — what Corpus Merge returns after
    /// an upsert, and what the coordinator hands off to similarity.
    pub async fn all_for_tenant(&self, tenant_id: &str) -> Result<Vec<Item>, DieselError> {
        let rows: Vec<ItemRow> = with_conn!(self.pool, conn, {
            items::table
                .filter(items::tenant_id.eq(tenant_id))
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(ItemRow::into_domain).collect())
    }

    pub async fn get(&self, tenant_id: &str, file: &str) -> Result<Option<Item>, DieselError> {
        let row: Option<ItemRow> = with_conn!(self.pool, conn, {
            items::table
                .filter(items::tenant_id.eq(tenant_id))
                .filter(items::file.eq(file))
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(row.map(ItemRow::into_domain))
    }

    /// Upsert one item by its natural key `(tenant_id, file)`. Create: copies
    /// every field as given. Update: overwrites run/payload fields and resets
    /// `similarity_group_id` to null, since it must be recomputed by a
    /// subsequent similarity run.
    pub async fn upsert(&self, item: &Item) -> Result<(), DieselError> {
        let parse_payload = serde_json::to_string(&item.parse_payload).unwrap_or_default();
        let categorization = item
            .categorization
            .as_ref()
            .map(|c| serde_json::to_string(c).unwrap_or_default());

        let stmt = Query::insert()
            .into_table(ItemsIden::Table)
            .columns([
                ItemsIden::TenantId,
                ItemsIden::File,
                ItemsIden::PipelineRunId,
                ItemsIden::SourceDocumentId,
                ItemsIden::Success,
                ItemsIden::ParsePayload,
                ItemsIden::Categorization,
                ItemsIden::SimilarityGroupId,
                ItemsIden::MarkedWrong,
                ItemsIden::MarkedWrongAt,
            ])
            .values_panic([
                item.tenant_id.clone().into(),
                item.file.clone().into(),
                item.pipeline_run_id.clone().into(),
                item.source_document_id.clone().into(),
                item.success.into(),
                parse_payload.clone().into(),
                categorization.clone().into(),
                None::<String>.into(),
                false.into(),
                None::<String>.into(),
            ])
            .on_conflict(
                OnConflict::columns([ItemsIden::TenantId, ItemsIden::File])
                    .update_columns([
                        ItemsIden::PipelineRunId,
                        ItemsIden::SourceDocumentId,
                        ItemsIden::Success,
                        ItemsIden::ParsePayload,
                        ItemsIden::Categorization,
                        ItemsIden::SimilarityGroupId,
                    ])
                    .to_owned(),
            )
            .to_owned();

        let sql = build_sql(&self.pool, &stmt);

        with_conn!(self.pool, conn, {
            diesel::sql_query(&sql)
                .bind::<diesel::sql_types::Text, _>(&item.tenant_id)
                .bind::<diesel::sql_types::Text, _>(&item.file)
                .bind::<diesel::sql_types::Text, _>(&item.pipeline_run_id)
                .bind::<diesel::sql_types::Text, _>(&item.source_document_id)
                .bind::<diesel::sql_types::Bool, _>(item.success)
                .bind::<diesel::sql_types::Text, _>(&parse_payload)
                .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(categorization.as_deref())
                .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(None::<&str>)
                .bind::<diesel::sql_types::Bool, _>(false)
                .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(None::<&str>)
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Upsert a batch in chunks of `chunk_size`, per the Corpus Merge's
    /// "chunks of 100" requirement — keeps any single transaction's write set
    /// bounded regardless of how many items a run produced.
    pub async fn upsert_chunked(&self, items: &[Item], chunk_size: usize) -> Result<(), DieselError> {
        for chunk in items.chunks(chunk_size.max(1)) {
            for item in chunk {
                self.upsert(item).await?;
            }
        }
        Ok(())
    }

    /// Persist a similarity group assignment for one item — the Split
    /// stage's row-at-a-time write-back, not transactional across items.
    pub async fn set_similarity_group(
        &self,
        tenant_id: &str,
        file: &str,
        group_id: Option<&str>,
    ) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(
                items::table
                    .filter(items::tenant_id.eq(tenant_id))
                    .filter(items::file.eq(file)),
            )
            .set(items::similarity_group_id.eq(group_id))
            .execute(&mut conn)
            .await
        })?;
        Ok(())
    }

    /// Admin mutation: flag an item as wrong (or clear the flag).
    pub async fn set_marked_wrong(
        &self,
        tenant_id: &str,
        file: &str,
        marked_wrong: bool,
    ) -> Result<(), DieselError> {
        let at = if marked_wrong {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        with_conn!(self.pool, conn, {
            diesel::update(
                items::table
                    .filter(items::tenant_id.eq(tenant_id))
                    .filter(items::file.eq(file)),
            )
            .set((
                items::marked_wrong.eq(marked_wrong),
                items::marked_wrong_at.eq(&at),
            ))
            .execute(&mut conn)
            .await
        })?;
        Ok(())
    }

    /// Delete every item written by any of `run_ids` — used by batch-parent
    /// restart, which must clear out the prior attempt's merged items before
    /// repeating fan-out.
    pub async fn delete_for_runs(&self, run_ids: &[String]) -> Result<(), DieselError> {
        if run_ids.is_empty() {
            return Ok(());
        }
        with_conn!(self.pool, conn, {
            diesel::delete(items::table.filter(items::pipeline_run_id.eq_any(run_ids)))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }
}

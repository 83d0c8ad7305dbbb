//! Corpus Merge — upserts a run's produced items into the tenant's shared
//! corpus inside one serializable transaction, then hands back the full
//! tenant item set. Uses `conn.transaction(|conn| Box::pin(async move {...}))`
//! to wrap a chunked multi-row upsert plus a trailing read-back in the same
//! transaction.
//!
//! `ItemRepository` itself checks out a connection per call and so can't give
//! atomicity across a chunked write; this module drives the same upsert SQL
//! (sea-query `ON CONFLICT`) against one held connection instead.

use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use sea_query::{OnConflict, Query};

use pipeline_core::models::{Categorization, Item};
use pipeline_core::repository::sea_tables::Items as ItemsIden;
use pipeline_core::repository::{build_sql, DbPool, Store};
use pipeline_core::schema::items;
use pipeline_core::with_conn;

use crate::error::CorpusMergeError;

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
            parse_payload: serde_json::from_str(&self.parse_payload)
                .unwrap_or(serde_json::Value::Null),
            categorization: self
                .categorization
                .and_then(|s| serde_json::from_str::<Categorization>(&s).ok()),
            similarity_group_id: self.similarity_group_id,
            marked_wrong: self.marked_wrong,
            marked_wrong_at: pipeline_core::repository::parse_datetime_opt(self.marked_wrong_at),
        }
    }
}

const CHUNK_SIZE: usize = 100;
const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

pub struct CorpusMerge {
    store: Store,
}

impl CorpusMerge {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Upsert `items` (any subset of one tenant's corpus) and return the
    /// tenant's complete item set, all within one serializable transaction.
    /// Serializable isolation is what gives the "at most one categorize
    /// transaction per tenant succeeds at a time" guarantee; on Postgres this
    /// is a real isolation level, on SQLite it falls out of the engine's
    /// single-writer semantics.
    pub async fn merge(&self, tenant_id: &str, items: &[Item]) -> Result<Vec<Item>, CorpusMergeError> {
        tokio::time::timeout(TRANSACTION_TIMEOUT, self.merge_inner(tenant_id, items))
            .await
            .map_err(|_| CorpusMergeError::TimedOut(TRANSACTION_TIMEOUT))?
    }

    async fn merge_inner(&self, tenant_id: &str, items: &[Item]) -> Result<Vec<Item>, CorpusMergeError> {
        let pool = self.store.pool().clone();
        let is_postgres = pool.is_postgres();
        let tenant_id = tenant_id.to_string();
        let owned_items: Vec<Item> = items.to_vec();
        let upsert_stmt = upsert_sql(&pool);

        let rows: Vec<ItemRow> = with_conn!(pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    if is_postgres {
                        diesel::sql_query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                            .execute(conn)
                            .await?;
                    }

                    for chunk in owned_items.chunks(CHUNK_SIZE) {
                        for item in chunk {
                            let parse_payload =
                                serde_json::to_string(&item.parse_payload).unwrap_or_default();
                            let categorization = item
                                .categorization
                                .as_ref()
                                .map(|c| serde_json::to_string(c).unwrap_or_default());

                            diesel::sql_query(upsert_stmt.as_str())
                                .bind::<diesel::sql_types::Text, _>(&item.tenant_id)
                                .bind::<diesel::sql_types::Text, _>(&item.file)
                                .bind::<diesel::sql_types::Text, _>(&item.pipeline_run_id)
                                .bind::<diesel::sql_types::Text, _>(&item.source_document_id)
                                .bind::<diesel::sql_types::Bool, _>(item.success)
                                .bind::<diesel::sql_types::Text, _>(&parse_payload)
                                .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(
                                    categorization.as_deref(),
                                )
                                .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(
                                    None::<&str>,
                                )
                                .bind::<diesel::sql_types::Bool, _>(false)
                                .bind::<diesel::sql_types::Nullable<diesel::sql_types::Text>, _>(
                                    None::<&str>,
                                )
                                .execute(conn)
                                .await?;
                        }
                    }

                    items::table
                        .filter(items::tenant_id.eq(&tenant_id))
                        .load::<ItemRow>(conn)
                        .await
                })
            })
            .await
        })
        .map_err(CorpusMergeError::Store)?;

        Ok(rows.into_iter().map(ItemRow::into_domain).collect())
    }
}

/// Same statement shape as `ItemRepository::upsert`; values are bound
/// positionally afterward so this only needs to fix the column/placeholder
/// layout, not the data.
fn upsert_sql(pool: &DbPool) -> String {
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
            String::new().into(),
            String::new().into(),
            String::new().into(),
            String::new().into(),
            false.into(),
            String::new().into(),
            None::<String>.into(),
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

    build_sql(pool, &stmt)
}

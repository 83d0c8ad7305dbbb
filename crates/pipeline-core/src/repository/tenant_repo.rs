//! Tenant and tenant-category repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{DbPool, DieselError};
use crate::models::{Tenant, TenantCategory};
use crate::schema::{tenant_categories, tenants};
use crate::with_conn;

#[derive(Queryable, Debug, Clone)]
struct TenantRow {
    id: String,
    slug: String,
    ai_credential: Option<String>,
    max_concurrent_pipelines: i32,
    storage_budget_mb: i32,
    active: bool,
    created_at: String,
    updated_at: String,
}

#[derive(Queryable, Debug, Clone)]
struct TenantCategoryRow {
    id: String,
    tenant_id: String,
    key: String,
    name: String,
    subcategory: Option<String>,
    safe_name: String,
    sort_order: i32,
}

impl From<TenantCategoryRow> for TenantCategory {
    fn from(r: TenantCategoryRow) -> Self {
        TenantCategory {
            id: r.id,
            tenant_id: r.tenant_id,
            key: r.key,
            name: r.name,
            subcategory: r.subcategory,
            safe_name: r.safe_name,
            sort_order: r.sort_order,
        }
    }
}

#[derive(Clone)]
pub struct TenantRepository {
    pool: DbPool,
}

impl TenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, DieselError> {
        let row: Option<TenantRow> = with_conn!(self.pool, conn, {
            tenants::table
                .filter(tenants::id.eq(tenant_id))
                .first(&mut conn)
                .await
                .optional()
        })?;

        let Some(row) = row else { return Ok(None) };
        let categories = self.categories(tenant_id).await?;
        Ok(Some(Tenant {
            id: row.id,
            slug: row.slug,
            ai_credential: row.ai_credential,
            max_concurrent_pipelines: row.max_concurrent_pipelines as u32,
            storage_budget_mb: row.storage_budget_mb as u32,
            active: row.active,
            categories,
        }))
    }

    pub async fn categories(&self, tenant_id: &str) -> Result<Vec<TenantCategory>, DieselError> {
        let rows: Vec<TenantCategoryRow> = with_conn!(self.pool, conn, {
            tenant_categories::table
                .filter(tenant_categories::tenant_id.eq(tenant_id))
                .order(tenant_categories::sort_order.asc())
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().map(TenantCategory::from).collect())
    }

    pub async fn create(&self, tenant: &Tenant) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::insert_into(tenants::table)
                .values((
                    tenants::id.eq(&tenant.id),
                    tenants::slug.eq(&tenant.slug),
                    tenants::ai_credential.eq(&tenant.ai_credential),
                    tenants::max_concurrent_pipelines.eq(tenant.max_concurrent_pipelines as i32),
                    tenants::storage_budget_mb.eq(tenant.storage_budget_mb as i32),
                    tenants::active.eq(tenant.active),
                    tenants::created_at.eq(&now),
                    tenants::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
        })?;

        for cat in &tenant.categories {
            with_conn!(self.pool, conn, {
                diesel::insert_into(tenant_categories::table)
                    .values((
                        tenant_categories::id.eq(&cat.id),
                        tenant_categories::tenant_id.eq(&tenant.id),
                        tenant_categories::key.eq(&cat.key),
                        tenant_categories::name.eq(&cat.name),
                        tenant_categories::subcategory.eq(&cat.subcategory),
                        tenant_categories::safe_name.eq(&cat.safe_name),
                        tenant_categories::sort_order.eq(cat.sort_order),
                    ))
                    .execute(&mut conn)
                    .await
            })?;
        }
        Ok(())
    }

    pub async fn set_active(&self, tenant_id: &str, active: bool) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(tenants::table.filter(tenants::id.eq(tenant_id)))
                .set((tenants::active.eq(active), tenants::updated_at.eq(&now)))
                .execute(&mut conn)
                .await
        })?;
        Ok(())
    }

    /// Replace a tenant's category list wholesale (used by config reloads).
    pub async fn replace_categories(
        &self,
        tenant_id: &str,
        categories: &[TenantCategory],
    ) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::delete(
                tenant_categories::table.filter(tenant_categories::tenant_id.eq(tenant_id)),
            )
            .execute(&mut conn)
            .await
        })?;

        for cat in categories {
            with_conn!(self.pool, conn, {
                diesel::insert_into(tenant_categories::table)
                    .values((
                        tenant_categories::id.eq(&cat.id),
                        tenant_categories::tenant_id.eq(tenant_id),
                        tenant_categories::key.eq(&cat.key),
                        tenant_categories::name.eq(&cat.name),
                        tenant_categories::subcategory.eq(&cat.subcategory),
                        tenant_categories::safe_name.eq(&cat.safe_name),
                        tenant_categories::sort_order.eq(cat.sort_order),
                    ))
                    .execute(&mut conn)
                    .await
            })?;
        }
        Ok(())
    }
}

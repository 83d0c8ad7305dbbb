//! `Store` — the bundled repository access point for every pipeline
//! component. Construct one per process from [`crate::config::PipelineSettings`]
//! and pass it down as an explicit dependency; there is no process-wide
//! singleton here.

use std::path::Path;

use super::pool::{DbPool, DieselError};
use super::{ItemRepository, JobRepository, RunRepository, TenantRepository};

/// Owns the connection pool, the database URL it was built from (needed to
/// re-run migrations), and hands out repository handles. Cloning is cheap —
/// every repository just wraps the same pooled [`DbPool`].
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
    database_url: String,
    pub tenants: TenantRepository,
    pub runs: RunRepository,
    pub jobs: JobRepository,
    pub items: ItemRepository,
}

impl Store {
    pub fn from_url(database_url: &str, no_tls: bool) -> Result<Self, DieselError> {
        let pool = DbPool::from_url(database_url, no_tls).map_err(|e| match e {
            super::pool::DbError::Query(q) => q,
            other => DieselError::QueryBuilderError(other.to_string().into()),
        })?;
        Ok(Self::with_pool(pool, database_url))
    }

    pub fn from_sqlite_path(db_path: &Path) -> Result<Self, DieselError> {
        let url = format!("sqlite:{}", db_path.display());
        Self::from_url(&url, false)
    }

    pub fn with_pool(pool: DbPool, database_url: impl Into<String>) -> Self {
        Self {
            tenants: TenantRepository::new(pool.clone()),
            runs: RunRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            items: ItemRepository::new(pool.clone()),
            pool,
            database_url: database_url.into(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Apply every pending migration. Safe to call on every process start —
    /// already-applied migrations are skipped.
    pub async fn migrate(&self, no_tls: bool) -> Result<(), DieselError> {
        super::migrations::run_migrations(&self.database_url, no_tls).await
    }

    pub async fn test_connection(&self) -> Result<(), DieselError> {
        crate::with_conn!(self.pool, _conn, Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tenant;
    use tempfile::tempdir;

    #[tokio::test]
    async fn store_roundtrips_a_tenant() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db_url = format!("sqlite:{}", db_path.display());

        super::super::migrations::run_migrations(&db_url, false)
            .await
            .unwrap();

        let store = Store::from_sqlite_path(&db_path).unwrap();
        let tenant = Tenant::new("t1", "acme");
        store.tenants.create(&tenant).await.unwrap();

        let fetched = store.tenants.get("t1").await.unwrap().unwrap();
        assert_eq!(fetched.slug, "acme");
    }
}

//! Backend-agnostic connection pool: SQLite for local/dev/test, PostgreSQL
//! for deployments that need `SERIALIZABLE` transactions (the Corpus Merge
//! requires it — see `repository::item_repo`).
//!
//! Call sites that don't care which backend is active should go through the
//! [`with_conn!`] / [`with_conn_split!`] macros rather than matching on
//! [`DbPool`] themselves.

use deadpool::managed::{Manager, Pool};
use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use thiserror::Error;

#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::deadpool::Pool as PgPool;
#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

/// Query-layer error alias. Repository methods return this so call sites
/// don't need to know which backend produced it.
pub type DieselError = diesel::result::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to build connection pool: {0}")]
    Pool(String),
    #[error("connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("query error: {0}")]
    Query(#[from] DieselError),
    #[error("unrecognized database url: {0}")]
    UnrecognizedUrl(String),
}

struct SqliteManager {
    url: String,
}

impl Manager for SqliteManager {
    type Type = SyncConnectionWrapper<SqliteConnection>;
    type Error = diesel::ConnectionError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        SyncConnectionWrapper::<SqliteConnection>::establish(&self.url).await
    }

    async fn recycle(
        &self,
        _conn: &mut Self::Type,
        _metrics: &deadpool::managed::Metrics,
    ) -> deadpool::managed::RecycleResult<Self::Error> {
        Ok(())
    }
}

/// Connection pool for either backend. Cloning is cheap (the inner pools are
/// reference-counted).
#[derive(Clone)]
pub enum DbPool {
    Sqlite(Pool<SqliteManager>),
    #[cfg(feature = "postgres")]
    Postgres(PgPool<AsyncPgConnection>),
}

impl DbPool {
    /// Build a pool from a `sqlite:` or `postgres(ql)?:` URL.
    pub fn from_url(database_url: &str, no_tls: bool) -> Result<Self, DbError> {
        if is_postgres_url(database_url) {
            #[cfg(feature = "postgres")]
            {
                let url = database_url.to_string();
                let manager = if no_tls {
                    AsyncDieselConnectionManager::<AsyncPgConnection>::new(url)
                } else {
                    AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_setup(
                        url,
                        |u| Box::pin(super::pg_tls::establish_tls_connection(u)),
                    )
                };
                let pool = PgPool::builder(manager)
                    .build()
                    .map_err(|e| DbError::Pool(e.to_string()))?;
                return Ok(DbPool::Postgres(pool));
            }
            #[cfg(not(feature = "postgres"))]
            {
                return Err(DbError::UnrecognizedUrl(format!(
                    "postgres url given but the `postgres` feature is not enabled: {}",
                    database_url
                )));
            }
        }

        let url = database_url
            .strip_prefix("sqlite:")
            .unwrap_or(database_url)
            .to_string();
        let manager = SqliteManager { url };
        let pool = Pool::builder(manager)
            .build()
            .map_err(|e| DbError::Pool(e.to_string()))?;
        Ok(DbPool::Sqlite(pool))
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self, DbPool::Sqlite(_))
    }

    #[cfg(feature = "postgres")]
    pub fn is_postgres(&self) -> bool {
        matches!(self, DbPool::Postgres(_))
    }

    #[cfg(not(feature = "postgres"))]
    pub fn is_postgres(&self) -> bool {
        false
    }
}

pub fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

/// Render a sea-query statement for whichever backend `pool` wraps. The
/// placeholder convention differs (`$1` for Postgres, `?` for SQLite), so
/// dynamic upserts that go through `diesel::sql_query(...).bind(...)` must
/// build their SQL from the right `QueryBuilder` before binding.
pub fn build_sql<S: sea_query::QueryStatementWriter>(pool: &DbPool, stmt: &S) -> String {
    match pool {
        DbPool::Sqlite(_) => stmt.to_string(sea_query::SqliteQueryBuilder),
        #[cfg(feature = "postgres")]
        DbPool::Postgres(_) => stmt.to_string(sea_query::PostgresQueryBuilder),
    }
}

/// Run `$body` against a live connection, whichever backend `$pool` wraps.
/// Binds `$conn` to the checked-out connection for the duration of `$body`.
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident, $body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $conn = pool
                    .get()
                    .await
                    .map_err(|e| diesel::result::Error::QueryBuilderError(e.to_string().into()))?;
                $body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $conn = pool
                    .get()
                    .await
                    .map_err(|e| diesel::result::Error::QueryBuilderError(e.to_string().into()))?;
                $body
            }
        }
    }};
}

/// Like [`with_conn!`] but with separate arms per backend, for call sites
/// whose query shape genuinely differs between SQLite and Postgres (e.g. the
/// `ON CONFLICT` upsert dialect, or backend-specific system catalog queries).
#[macro_export]
macro_rules! with_conn_split {
    ($pool:expr, sqlite: $sconn:ident => $sbody:block, postgres: $pconn:ident => $pbody:block) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $sconn = pool
                    .get()
                    .await
                    .map_err(|e| diesel::result::Error::QueryBuilderError(e.to_string().into()))?;
                $sbody
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                let mut $pconn = pool
                    .get()
                    .await
                    .map_err(|e| diesel::result::Error::QueryBuilderError(e.to_string().into()))?;
                $pbody
            }
        }
    }};
}

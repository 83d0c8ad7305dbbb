//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking, on
//! either a SQLite (single-process dev/test) or PostgreSQL (multi-worker
//! production, required for the Corpus Merge's serializable isolation) pool.

pub mod diesel_context;
pub mod item_repo;
pub mod job_repo;
pub mod migrations;
#[cfg(feature = "postgres")]
pub mod pg_tls;
pub mod pool;
pub mod run_repo;
pub mod sea_tables;
pub mod tenant_repo;

pub use diesel_context::Store;
pub use item_repo::ItemRepository;
pub use job_repo::JobRepository;
pub use pool::{build_sql, DbError, DbPool, DieselError};
pub use run_repo::RunRepository;
pub use tenant_repo::TenantRepository;

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

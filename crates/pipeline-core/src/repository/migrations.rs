//! Schema migrations via `cetane`, run in a blocking task to bridge the
//! synchronous migrator interface with async connection pools.

use cetane::migrator::MigrationStateStore;
use tracing::info;

use super::pool::DieselError;

/// Run pending migrations for a database URL, creating the tenant/run/job/
/// item/queue tables the rest of the store depends on.
pub async fn run_migrations(database_url: &str, no_tls: bool) -> Result<(), DieselError> {
    let url = database_url.to_string();

    if super::pool::is_postgres_url(&url) {
        #[cfg(feature = "postgres")]
        {
            run_postgres_migrations_async(&url, no_tls).await
        }
        #[cfg(not(feature = "postgres"))]
        {
            let _ = no_tls;
            Err(DieselError::QueryBuilderError(
                "PostgreSQL support not compiled. Use --features postgres".into(),
            ))
        }
    } else {
        let _ = no_tls;
        run_sqlite_migrations_async(&url).await
    }
}

fn migration_error(msg: impl std::fmt::Display) -> DieselError {
    DieselError::QueryBuilderError(msg.to_string().into())
}

async fn run_sqlite_migrations_async(database_url: &str) -> Result<(), DieselError> {
    use cetane::backend::Sqlite;
    use cetane::migrator::Migrator;

    let url = database_url
        .strip_prefix("sqlite:")
        .unwrap_or(database_url)
        .to_string();

    tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&url).map_err(migration_error)?;
        let backend = Sqlite;
        let registry = crate::migrations::registry();
        let state = SqliteState::new(&conn)?;

        let mut migrator = Migrator::new(&registry, &backend, state);
        let applied = migrator
            .migrate_forward(|sql| conn.execute_batch(sql).map_err(|e| e.to_string()))
            .map_err(migration_error)?;

        for name in &applied {
            info!("applied migration: {}", name);
        }
        if applied.is_empty() {
            info!("no pending migrations");
        }
        Ok(())
    })
    .await
    .map_err(|e| DieselError::QueryBuilderError(Box::new(e)))?
}

#[cfg(feature = "postgres")]
async fn run_postgres_migrations_async(database_url: &str, no_tls: bool) -> Result<(), DieselError> {
    use cetane::backend::Postgres;
    use cetane::migrator::Migrator;

    let client = super::pg_tls::connect_raw(database_url, no_tls)
        .await
        .map_err(migration_error)?;

    let backend = Postgres;
    let registry = crate::migrations::registry();
    let state = PostgresState::new(&client).await?;

    let mut migrator = Migrator::new(&registry, &backend, state);
    let applied = migrator
        .migrate_forward(|sql| {
            let rt = tokio::runtime::Handle::current();
            std::thread::scope(|s| {
                s.spawn(|| {
                    rt.block_on(async {
                        client.execute(sql, &[]).await.map_err(|e| e.to_string())?;
                        Ok::<(), String>(())
                    })
                })
                .join()
                .map_err(|_| "thread panicked".to_string())?
            })
        })
        .map_err(migration_error)?;

    for name in &applied {
        info!("applied migration: {}", name);
    }
    if applied.is_empty() {
        info!("no pending migrations");
    }
    Ok(())
}

struct SqliteState<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteState<'a> {
    fn new(conn: &'a rusqlite::Connection) -> Result<Self, DieselError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .map_err(migration_error)?;
        Ok(Self { conn })
    }
}

impl cetane::migrator::MigrationStateStore for SqliteState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __cetane_migrations ORDER BY name")
            .map_err(|e| e.to_string())?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(names)
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO __cetane_migrations (name) VALUES (?1)",
                [name],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM __cetane_migrations WHERE name = ?1", [name])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(feature = "postgres")]
struct PostgresState<'a> {
    client: &'a tokio_postgres::Client,
    applied: Vec<String>,
}

#[cfg(feature = "postgres")]
impl<'a> PostgresState<'a> {
    async fn new(client: &'a tokio_postgres::Client) -> Result<Self, DieselError> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                    name TEXT PRIMARY KEY NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                &[],
            )
            .await
            .map_err(migration_error)?;

        let rows = client
            .query("SELECT name FROM __cetane_migrations ORDER BY name", &[])
            .await
            .map_err(migration_error)?;
        let applied = rows.iter().map(|r| r.get::<_, String>(0)).collect();
        Ok(Self { client, applied })
    }
}

#[cfg(feature = "postgres")]
impl cetane::migrator::MigrationStateStore for PostgresState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        Ok(self.applied.clone())
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        let rt = tokio::runtime::Handle::current();
        std::thread::scope(|s| {
            s.spawn(|| {
                rt.block_on(async {
                    self.client
                        .execute(
                            "INSERT INTO __cetane_migrations (name) VALUES ($1) ON CONFLICT DO NOTHING",
                            &[&name],
                        )
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok::<(), String>(())
                })
            })
            .join()
            .map_err(|_| "thread panicked".to_string())?
        })?;
        if !self.applied.contains(&name.to_string()) {
            self.applied.push(name.to_string());
        }
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        let rt = tokio::runtime::Handle::current();
        std::thread::scope(|s| {
            s.spawn(|| {
                rt.block_on(async {
                    self.client
                        .execute("DELETE FROM __cetane_migrations WHERE name = $1", &[&name])
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok::<(), String>(())
                })
            })
            .join()
            .map_err(|_| "thread panicked".to_string())?
        })?;
        self.applied.retain(|n| n != name);
        Ok(())
    }
}

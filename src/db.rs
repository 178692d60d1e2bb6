use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction,
    Statement, TransactionTrait,
};
use sqlx::postgres::PgPoolOptions;
use tokio::fs;

use crate::error::AppResult;

pub type DbPool = sqlx::PgPool;
pub type OrmConn = DatabaseConnection;

const MIGRATIONS_DIR: &str = "migrations";
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
/// Row-lock waits inside a unit of work give up after this long and surface
/// as `AppError::Conflict` (SQLSTATE 55P03).
const LOCK_TIMEOUT_SQL: &str = "SET LOCAL lock_timeout = '5s'";
/// Serializes concurrent migration runners.
const MIGRATION_LOCK_KEY: i64 = 0x5348_4f50;

/// Create the raw sqlx pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Create a SeaORM connection.
pub async fn create_orm_conn(
    database_url: &str,
    max_connections: u32,
) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .sqlx_logging(false);
    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Open a unit of work. Committing is explicit; dropping the transaction on
/// any other exit path (including `?`) rolls it back.
pub async fn begin(conn: &DatabaseConnection) -> AppResult<DatabaseTransaction> {
    let txn = conn.begin().await?;
    txn.execute_unprepared(LOCK_TIMEOUT_SQL).await?;
    Ok(txn)
}

/// Executes the SQL files in `migrations/` in filename order inside a single
/// transaction. Every statement is idempotent so re-running is safe.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    let mut entries = fs::read_dir(MIGRATIONS_DIR).await?;
    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    let txn = conn.begin().await?;
    let backend = txn.get_database_backend();
    txn.execute(Statement::from_string(
        backend,
        format!("SELECT pg_advisory_xact_lock({MIGRATION_LOCK_KEY})"),
    ))
    .await?;

    for file in files {
        let sql = fs::read_to_string(&file).await?;
        // Postgres prepared statements cannot contain multiple commands,
        // so split the migration file and run each statement individually.
        for stmt in split_statements(&sql) {
            txn.execute(Statement::from_string(backend, stmt)).await?;
        }
        tracing::debug!(file = %file.display(), "migration applied");
    }

    txn.commit().await?;
    Ok(())
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| {
            stmt.lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && !line.starts_with("--"))
        })
        .map(|stmt| format!("{stmt};"))
        .collect()
}

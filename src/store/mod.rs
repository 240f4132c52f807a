pub mod accounts;
pub mod conversations;
pub mod schema;
pub mod usage;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Open (or create) the gateway database and initialize the schema.
///
/// WAL keeps concurrent request tasks from serializing on readers; the busy
/// timeout absorbs short write-lock contention instead of surfacing it as an
/// error.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    use anyhow::Context;

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("open gateway database")?;

    schema::init_schema(&pool)
        .await
        .context("initialize gateway schema")?;

    Ok(pool)
}

/// Single-connection in-memory pool for unit tests.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory SQLite");
    schema::init_schema(&pool).await.expect("init schema");
    pool
}

/// UTC timestamp in the store's canonical text format.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

//! Connection pool for the derived full-text index.
//!
//! The index is disposable: it can always be rebuilt from the canonical log,
//! so it runs with `synchronous = NORMAL` under WAL. A rebuild holds the write
//! lock for one transaction; readers on other connections keep seeing the
//! last committed snapshot and wait up to [`BUSY_TIMEOUT`] for locks.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 5;

/// Open the index database configured for `config`.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    open_index(&config.index_path()).await
}

/// Open (creating if missing) the index database at `path`.
pub async fn open_index(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;
    tracing::debug!(path = %path.display(), "opened full-text index");

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_database_and_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("beats.db");
        let pool = open_index(&path).await.unwrap();

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        pool.close().await;
        assert!(path.exists());
    }
}

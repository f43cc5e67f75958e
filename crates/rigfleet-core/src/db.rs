//! `SQLite` plumbing for the hub's rig store.
//!
//! The store lives in a file in production and in memory under test. The two
//! need different pool tuning: a file store runs in WAL mode with a few
//! readers, while an in-memory store is a single connection that must never
//! be recycled, since closing it discards the database.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

/// How long a writer waits on a locked file store before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections kept for a file store. Telemetry writes are serialized by
/// `SQLite` anyway; the extra connections serve REST reads.
const FILE_POOL_SIZE: u32 = 4;

/// Errors from the rig store.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Cannot create database directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open database: {0}")]
    Open(#[source] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Cannot encode telemetry for rig {rig_id}: {source}")]
    Snapshot {
        rig_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Rig not found: {0}")]
    RigNotFound(String),
}

/// Where the rig store keeps its data.
#[derive(Debug, Clone, Copy)]
pub enum StoreLocation<'a> {
    File(&'a Path),
    Memory,
}

impl StoreLocation<'_> {
    fn connect_options(self) -> Result<SqliteConnectOptions, DatabaseError> {
        let options = match self {
            Self::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(BUSY_TIMEOUT),
            Self::Memory => {
                SqliteConnectOptions::from_str("sqlite::memory:").map_err(DatabaseError::Open)?
            }
        };
        Ok(options.foreign_keys(true))
    }

    fn pool_options(self) -> SqlitePoolOptions {
        match self {
            Self::File(_) => SqlitePoolOptions::new().max_connections(FILE_POOL_SIZE),
            Self::Memory => SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>),
        }
    }
}

/// Open a connection pool for the rig store.
///
/// For a file store the parent directory is created first.
pub async fn open_pool(location: StoreLocation<'_>) -> Result<Pool<Sqlite>, DatabaseError> {
    if let StoreLocation::File(path) = location {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let pool = location
        .pool_options()
        .connect_with(location.connect_options()?)
        .await
        .map_err(DatabaseError::Open)?;

    match location {
        StoreLocation::File(path) => info!(path = %path.display(), "Rig store opened"),
        StoreLocation::Memory => debug!("In-memory rig store opened"),
    }
    Ok(pool)
}

/// Current time as Unix seconds.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unix_timestamp_is_reasonable() {
        // After 2024-01-01.
        assert!(unix_timestamp() > 1_704_067_200);
    }

    #[tokio::test]
    async fn file_store_creates_directory_and_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hub.db");

        let pool = open_pool(StoreLocation::File(&path)).await.unwrap();
        assert!(path.exists());
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        pool.close().await;
    }

    #[tokio::test]
    async fn memory_store_keeps_data_across_queries() {
        let pool = open_pool(StoreLocation::Memory).await.unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES (7)")
            .execute(&pool)
            .await
            .unwrap();

        let (v,): (i64,) = sqlx::query_as("SELECT v FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(v, 7);
        let (fks,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fks, 1);
    }

    #[test]
    fn missing_rig_names_the_rig() {
        let err = DatabaseError::RigNotFound("r-42".into());
        assert_eq!(err.to_string(), "Rig not found: r-42");
    }
}

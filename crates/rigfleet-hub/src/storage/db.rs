//! `SQLite` database handle for the hub.

use std::path::Path;

use sqlx::{Pool, Sqlite};
use tracing::info;

use rigfleet_core::db::{DatabaseError, StoreLocation, open_pool};

/// Rig store. Cloning shares the pool.
#[derive(Clone)]
pub struct HubDatabase {
    pool: Pool<Sqlite>,
}

impl HubDatabase {
    /// Open or create the store at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_at(StoreLocation::File(path)).await
    }

    /// Open a private in-memory store.
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::open_at(StoreLocation::Memory).await
    }

    async fn open_at(location: StoreLocation<'_>) -> Result<Self, DatabaseError> {
        let db = Self {
            pool: open_pool(location).await?,
        };
        sqlx::migrate!("./migrations").run(&db.pool).await?;
        info!("Rig store schema up to date");
        Ok(db)
    }

    pub(super) const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

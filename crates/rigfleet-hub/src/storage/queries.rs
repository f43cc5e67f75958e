//! Database queries for the hub.

use rigfleet_core::db::unix_timestamp;
use rigfleet_core::{RigStatus, TelemetrySnapshot};

use super::db::HubDatabase;
use super::models::Rig;
use rigfleet_core::db::DatabaseError;

impl HubDatabase {
    /// Provision a rig. `token_hash` is the SHA-256 hex digest of its agent token.
    pub async fn create_rig(
        &self,
        id: &str,
        name: &str,
        token_hash: &str,
    ) -> Result<Rig, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO rigs (id, name, token_hash, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(token_hash)
        .bind(RigStatus::Offline.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_rig(id).await
    }

    /// Get a rig by ID.
    pub async fn get_rig(&self, id: &str) -> Result<Rig, DatabaseError> {
        sqlx::query_as::<_, Rig>("SELECT * FROM rigs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::RigNotFound(id.to_string()))
    }

    /// Resolve an agent token digest to its rig.
    pub async fn get_rig_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Rig>, DatabaseError> {
        let rig = sqlx::query_as::<_, Rig>("SELECT * FROM rigs WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?;

        Ok(rig)
    }

    /// List all rigs ordered by name.
    pub async fn list_rigs(&self) -> Result<Vec<Rig>, DatabaseError> {
        let rigs = sqlx::query_as::<_, Rig>("SELECT * FROM rigs ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;

        Ok(rigs)
    }

    /// Update a rig's status.
    pub async fn update_rig_status(
        &self,
        id: &str,
        status: RigStatus,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE rigs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(unix_timestamp())
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Store a full telemetry snapshot, including status and `last_seen`.
    pub async fn update_rig_telemetry(
        &self,
        snapshot: &TelemetrySnapshot,
    ) -> Result<bool, DatabaseError> {
        let json = serde_json::to_string(snapshot).map_err(|source| DatabaseError::Snapshot {
            rig_id: snapshot.rig_id.clone(),
            source,
        })?;

        let result = sqlx::query(
            "UPDATE rigs SET status = ?, last_seen = ?, telemetry = ?, updated_at = ? WHERE id = ?",
        )
        .bind(snapshot.status.as_str())
        .bind(snapshot.last_seen)
        .bind(json)
        .bind(unix_timestamp())
        .bind(&snapshot.rig_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Force every rig to `OFFLINE`. Used at startup, before any agent has connected.
    pub async fn mark_all_rigs_offline(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE rigs SET status = ?, updated_at = ? WHERE status != ?")
            .bind(RigStatus::Offline.as_str())
            .bind(unix_timestamp())
            .bind(RigStatus::Offline.as_str())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

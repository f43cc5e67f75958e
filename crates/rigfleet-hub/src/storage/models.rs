//! Data models for hub storage.

use serde::{Deserialize, Serialize};

use rigfleet_core::{RigStatus, TelemetrySnapshot};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rig {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub status: String,
    pub last_seen: Option<i64>,
    /// Last telemetry snapshot as JSON.
    pub telemetry: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Rig {
    /// Stored status, `Offline` if the column holds something unexpected.
    pub fn status(&self) -> RigStatus {
        self.status.parse().unwrap_or_default()
    }

    /// Rebuild the telemetry snapshot for this rig.
    ///
    /// Identity and status always come from the row itself; hardware
    /// readings come from the stored JSON when it is present and readable.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let mut snap = self
            .telemetry
            .as_deref()
            .and_then(|json| serde_json::from_str::<TelemetrySnapshot>(json).ok())
            .unwrap_or_else(|| TelemetrySnapshot::offline(&self.id, &self.name));
        snap.rig_id.clone_from(&self.id);
        snap.rig_name.clone_from(&self.name);
        snap.status = self.status();
        snap.last_seen = self.last_seen;
        snap
    }
}

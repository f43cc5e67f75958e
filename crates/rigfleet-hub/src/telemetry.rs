//! Telemetry cache with write-through persistence.
//!
//! Holds the latest [`TelemetrySnapshot`] of every provisioned rig. Every
//! mutation is persisted to the rig record and published on the event feed.
//! Persistence failures are logged and never block the hub.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rigfleet_core::protocol::{AlertLevel, RigAlert};
use rigfleet_core::telemetry::StatsReport;
use rigfleet_core::{RigStatus, TelemetrySnapshot};

use crate::events::{EventBus, HubEvent};
use crate::storage::{DatabaseError, HubDatabase};

/// Cached state of one rig.
struct RigEntry {
    snapshot: TelemetrySnapshot,
    /// Status derived from the latest stats report, before liveness or
    /// reboot overrides. `ONLINE` until the first report arrives.
    health: RigStatus,
    rebooting_since: Option<Instant>,
}

impl RigEntry {
    fn new(snapshot: TelemetrySnapshot) -> Self {
        let rebooting_since = (snapshot.status == RigStatus::Rebooting).then(Instant::now);
        Self {
            snapshot,
            health: RigStatus::Online,
            rebooting_since,
        }
    }
}

pub struct TelemetryStore {
    db: HubDatabase,
    events: EventBus,
    cache: RwLock<HashMap<String, RigEntry>>,
    gpu_temp_alert: f32,
}

impl TelemetryStore {
    pub fn new(db: HubDatabase, events: EventBus, gpu_temp_alert: f32) -> Self {
        Self {
            db,
            events,
            cache: RwLock::new(HashMap::new()),
            gpu_temp_alert,
        }
    }

    /// Populate the cache from storage with every rig marked `OFFLINE`.
    ///
    /// Nothing is connected when the hub starts, so stored statuses are stale.
    pub async fn load_from_db(&self) -> Result<usize, DatabaseError> {
        self.db.mark_all_rigs_offline().await?;
        let rigs = self.db.list_rigs().await?;
        let mut cache = self.cache.write().await;
        for rig in &rigs {
            cache.insert(rig.id.clone(), RigEntry::new(rig.snapshot()));
        }
        info!(rigs = rigs.len(), "Telemetry cache loaded");
        Ok(rigs.len())
    }

    /// Make sure a rig has a cache entry, refreshing its display name.
    pub async fn ensure_rig(&self, rig_id: &str, rig_name: &str) {
        let mut cache = self.cache.write().await;
        cache
            .entry(rig_id.to_string())
            .and_modify(|entry| {
                if entry.snapshot.rig_name != rig_name {
                    entry.snapshot.rig_name = rig_name.to_string();
                }
            })
            .or_insert_with(|| RigEntry::new(TelemetrySnapshot::offline(rig_id, rig_name)));
    }

    pub async fn get(&self, rig_id: &str) -> Option<TelemetrySnapshot> {
        self.cache
            .read()
            .await
            .get(rig_id)
            .map(|e| e.snapshot.clone())
    }

    pub async fn status(&self, rig_id: &str) -> Option<RigStatus> {
        self.cache.read().await.get(rig_id).map(|e| e.snapshot.status)
    }

    /// Status the latest stats report called for, ignoring liveness and
    /// reboot overrides.
    pub async fn health(&self, rig_id: &str) -> Option<RigStatus> {
        self.cache.read().await.get(rig_id).map(|e| e.health)
    }

    /// All snapshots, ordered by rig name.
    pub async fn list(&self) -> Vec<TelemetrySnapshot> {
        let mut all: Vec<TelemetrySnapshot> = self
            .cache
            .read()
            .await
            .values()
            .map(|e| e.snapshot.clone())
            .collect();
        all.sort_by(|a, b| {
            a.rig_name
                .cmp(&b.rig_name)
                .then_with(|| a.rig_id.cmp(&b.rig_id))
        });
        all
    }

    /// Rigs that entered `REBOOTING` more than `limit` ago.
    pub async fn rebooting_longer_than(&self, limit: Duration) -> Vec<String> {
        self.cache
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.rebooting_since.is_some_and(|t| t.elapsed() > limit))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Set a rig's status unconditionally. Returns whether it changed.
    pub async fn set_status(&self, rig_id: &str, status: RigStatus) -> bool {
        self.set_status_if(rig_id, |_| true, status).await
    }

    /// Set a rig's status if `allowed` accepts the current one.
    ///
    /// Returns `true` only when the status actually changed; only then is the
    /// change persisted and published.
    pub async fn set_status_if(
        &self,
        rig_id: &str,
        allowed: impl Fn(RigStatus) -> bool,
        status: RigStatus,
    ) -> bool {
        let snapshot = {
            let mut cache = self.cache.write().await;
            let Some(entry) = cache.get_mut(rig_id) else {
                warn!(rig_id = %rig_id, "Status change for unknown rig");
                return false;
            };
            let current = entry.snapshot.status;
            if current == status || !allowed(current) {
                return false;
            }
            debug!(rig_id = %rig_id, from = %current, to = %status, "Rig status changed");
            entry.snapshot.status = status;
            entry.rebooting_since = (status == RigStatus::Rebooting).then(Instant::now);
            entry.snapshot.clone()
        };

        if let Err(e) = self.db.update_rig_status(rig_id, status).await {
            warn!(rig_id = %rig_id, error = %e, "Failed to persist rig status");
        }
        self.events.publish(HubEvent::StatusChanged(snapshot));
        true
    }

    /// Record a liveness proof without touching hardware readings.
    pub async fn mark_seen(&self, rig_id: &str, at: i64) {
        if let Some(entry) = self.cache.write().await.get_mut(rig_id) {
            entry.snapshot.last_seen = Some(at);
        }
    }

    /// Merge a stats report, re-derive the status and notify observers.
    ///
    /// A `REBOOTING` rig keeps its status until it re-authenticates. Alerts
    /// follow the derived health, so a rig shown as `WARNING` for silence
    /// still raises one when its GPU overheats.
    pub async fn apply_stats(
        &self,
        rig_id: &str,
        report: StatsReport,
        seen_at: i64,
    ) -> Option<TelemetrySnapshot> {
        let (snapshot, status_changed, alert) = {
            let mut cache = self.cache.write().await;
            let Some(entry) = cache.get_mut(rig_id) else {
                warn!(rig_id = %rig_id, "Stats for unknown rig");
                return None;
            };
            let previous = entry.snapshot.status;
            let health = report.derived_status(self.gpu_temp_alert);
            let alert = if health == entry.health {
                None
            } else {
                self.alert_for(&entry.snapshot, &report, health, seen_at)
            };
            entry.health = health;
            let shown = if previous == RigStatus::Rebooting {
                previous
            } else {
                health
            };
            entry.snapshot.merge_stats(report, seen_at);
            entry.snapshot.status = shown;
            (entry.snapshot.clone(), shown != previous, alert)
        };

        if let Err(e) = self.db.update_rig_telemetry(&snapshot).await {
            warn!(rig_id = %rig_id, error = %e, "Failed to persist rig telemetry");
        }
        if status_changed {
            self.events
                .publish(HubEvent::StatusChanged(snapshot.clone()));
        }
        self.events.publish(HubEvent::Stats(snapshot.clone()));
        if let Some(alert) = alert {
            warn!(rig_id = %rig_id, message = %alert.message, "Rig alert raised");
            self.events.publish(HubEvent::Alert(alert));
        }
        Some(snapshot)
    }

    fn alert_for(
        &self,
        snap: &TelemetrySnapshot,
        report: &StatsReport,
        derived: RigStatus,
        raised_at: i64,
    ) -> Option<RigAlert> {
        let (level, message) = match derived {
            RigStatus::Error => {
                let err = report
                    .miner
                    .as_ref()
                    .and_then(|m| m.error.as_deref())
                    .unwrap_or("unknown");
                (AlertLevel::Critical, format!("Miner error: {err}"))
            }
            RigStatus::Warning => {
                let hottest = report
                    .gpus
                    .iter()
                    .filter_map(|g| g.temperature.map(|t| (g.index, t)))
                    .max_by(|a, b| a.1.total_cmp(&b.1))?;
                (
                    AlertLevel::Warning,
                    format!(
                        "GPU {} at {:.1}C (limit {:.1}C)",
                        hottest.0, hottest.1, self.gpu_temp_alert
                    ),
                )
            }
            _ => return None,
        };
        Some(RigAlert {
            rig_id: snap.rig_id.clone(),
            rig_name: snap.rig_name.clone(),
            level,
            message,
            raised_at,
        })
    }
}

//! Liveness monitor for agent connections.
//!
//! Periodically compares each connection's last heartbeat against two
//! thresholds: past the soft one the rig is shown as `WARNING`, past the
//! hard one its connection is closed and the rig goes `OFFLINE`. A rig that
//! stays `REBOOTING` past the hard threshold without re-authenticating is
//! given up on as well.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use rigfleet_core::RigStatus;
use rigfleet_core::config::LivenessConfig;

use crate::registry::{CloseReason, ConnectionRegistry};
use crate::telemetry::TelemetryStore;

/// What one check pass changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub warned: Vec<String>,
    pub restored: Vec<String>,
    pub closed: Vec<String>,
    pub reboot_expired: Vec<String>,
}

pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    telemetry: Arc<TelemetryStore>,
    check_interval: Duration,
    soft_threshold: Duration,
    hard_threshold: Duration,
    /// Rigs this monitor moved to `WARNING`; only these are restored.
    demoted: HashSet<String>,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        telemetry: Arc<TelemetryStore>,
        config: &LivenessConfig,
    ) -> Self {
        Self::with_thresholds(
            registry,
            telemetry,
            config.check_interval(),
            config.soft_threshold(),
            config.hard_threshold(),
        )
    }

    pub fn with_thresholds(
        registry: Arc<ConnectionRegistry>,
        telemetry: Arc<TelemetryStore>,
        check_interval: Duration,
        soft_threshold: Duration,
        hard_threshold: Duration,
    ) -> Self {
        Self {
            registry,
            telemetry,
            check_interval,
            soft_threshold,
            hard_threshold,
            demoted: HashSet::new(),
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Check on every tick until `shutdown` changes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // Skip first immediate tick

        info!(
            soft_secs = self.soft_threshold.as_secs(),
            hard_secs = self.hard_threshold.as_secs(),
            "Liveness monitor started"
        );
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.check().await;
                }
                _ = shutdown.changed() => {
                    info!("Liveness monitor shutting down");
                    return;
                }
            }
        }
    }

    /// Run one pass over all current connections.
    pub async fn check(&mut self) -> LivenessReport {
        let mut report = LivenessReport::default();
        let mut seen = HashSet::new();

        for conn in self.registry.entries().await {
            let rig_id = conn.rig_id.clone();
            let silence = conn.silence();
            seen.insert(rig_id.clone());

            if silence > self.hard_threshold {
                warn!(
                    rig_id = %rig_id,
                    silence_ms = silence.as_millis(),
                    "Agent missed hard liveness threshold, closing"
                );
                conn.close(CloseReason::LivenessTimeout);
                if self
                    .registry
                    .unregister(&rig_id, &conn.connection_id)
                    .await
                {
                    conn.fail_all_pending().await;
                    self.telemetry
                        .set_status_if(&rig_id, |s| s != RigStatus::Rebooting, RigStatus::Offline)
                        .await;
                }
                self.demoted.remove(&rig_id);
                report.closed.push(rig_id);
            } else if silence > self.soft_threshold {
                if self.demoted.contains(&rig_id) {
                    continue;
                }
                let demoted = self
                    .telemetry
                    .set_status_if(
                        &rig_id,
                        |s| matches!(s, RigStatus::Online | RigStatus::Error),
                        RigStatus::Warning,
                    )
                    .await;
                if demoted {
                    info!(rig_id = %rig_id, silence_ms = silence.as_millis(), "Agent quiet, marked WARNING");
                    self.demoted.insert(rig_id.clone());
                    report.warned.push(rig_id);
                }
            } else if self.demoted.remove(&rig_id) {
                let health = self
                    .telemetry
                    .health(&rig_id)
                    .await
                    .unwrap_or(RigStatus::Online);
                if self
                    .telemetry
                    .set_status_if(&rig_id, |s| s == RigStatus::Warning, health)
                    .await
                {
                    info!(rig_id = %rig_id, status = %health, "Agent heartbeating again, status restored");
                    report.restored.push(rig_id);
                }
            }
        }

        self.demoted.retain(|id| seen.contains(id));
        self.expire_reboots(&mut report).await;
        report
    }

    async fn expire_reboots(&self, report: &mut LivenessReport) {
        for rig_id in self
            .telemetry
            .rebooting_longer_than(self.hard_threshold)
            .await
        {
            let status = if self.registry.is_online(&rig_id).await {
                self.telemetry
                    .health(&rig_id)
                    .await
                    .unwrap_or(RigStatus::Online)
            } else {
                RigStatus::Offline
            };
            if self
                .telemetry
                .set_status_if(&rig_id, |s| s == RigStatus::Rebooting, status)
                .await
            {
                warn!(rig_id = %rig_id, status = %status, "Rig did not come back from reboot");
                report.reboot_expired.push(rig_id);
            }
        }
    }
}

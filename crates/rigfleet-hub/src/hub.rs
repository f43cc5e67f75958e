//! Wiring of the hub's shared components.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use rigfleet_core::HubConfig;

use crate::auth::{JwtManager, generate_rig_token, hash_token};
use crate::dashboard::DashboardHub;
use crate::dispatch::CommandDispatcher;
use crate::events::EventBus;
use crate::liveness::LivenessMonitor;
use crate::registry::{CloseReason, ConnectionRegistry};
use crate::storage::{DatabaseError, HubDatabase, Rig};
use crate::telemetry::TelemetryStore;

/// Cheaply clonable handle to every shared hub component.
#[derive(Clone)]
pub struct Hub {
    config: Arc<HubConfig>,
    db: HubDatabase,
    registry: Arc<ConnectionRegistry>,
    telemetry: Arc<TelemetryStore>,
    events: EventBus,
    dispatcher: CommandDispatcher,
    dashboard: Arc<DashboardHub>,
    jwt: Arc<JwtManager>,
}

impl Hub {
    /// Build the hub and load every provisioned rig as `OFFLINE`.
    pub async fn new(config: HubConfig, db: HubDatabase) -> Result<Self, DatabaseError> {
        let events = EventBus::default();
        let registry = Arc::new(ConnectionRegistry::new());
        let telemetry = Arc::new(TelemetryStore::new(
            db.clone(),
            events.clone(),
            config.alerts.gpu_temp_celsius,
        ));
        telemetry.load_from_db().await?;

        let dispatcher = CommandDispatcher::new(
            Arc::clone(&registry),
            config.commands.default_timeout(),
            config.commands.max_timeout(),
        );
        let dashboard = Arc::new(DashboardHub::new(
            Arc::clone(&telemetry),
            config.server.subscriber_queue,
        ));
        let jwt = Arc::new(JwtManager::new(
            config.server.jwt_secret.as_bytes(),
            config.server.token_ttl_secs,
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            registry,
            telemetry,
            events,
            dispatcher,
            dashboard,
            jwt,
        })
    }

    /// Start the liveness monitor and dashboard fan-out.
    ///
    /// Both stop when `shutdown` flips.
    pub fn spawn_background(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let monitor = LivenessMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.telemetry),
            &self.config.liveness,
        );
        let fanout = Arc::clone(&self.dashboard);
        let feed = self.events.subscribe();
        let fanout_shutdown = shutdown.clone();

        vec![
            monitor.spawn(shutdown.clone()),
            tokio::spawn(async move { fanout.run_fanout(feed, fanout_shutdown).await }),
        ]
    }

    /// Provision a new rig. Returns the record and its agent token.
    ///
    /// The raw token is not stored and cannot be recovered later.
    pub async fn provision_rig(&self, name: &str) -> Result<(Rig, String), DatabaseError> {
        let token = generate_rig_token();
        let id = uuid::Uuid::new_v4().to_string();
        let rig = self.db.create_rig(&id, name, &hash_token(&token)).await?;
        self.telemetry.ensure_rig(&rig.id, &rig.name).await;
        info!(rig_id = %rig.id, rig_name = %rig.name, "Rig provisioned");
        Ok((rig, token))
    }

    /// Ask every agent connection to close.
    pub async fn shutdown(&self) {
        self.registry.close_all(CloseReason::Shutdown).await;
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub const fn db(&self) -> &HubDatabase {
        &self.db
    }

    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub const fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub const fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub const fn dashboard(&self) -> &Arc<DashboardHub> {
        &self.dashboard
    }

    pub fn jwt(&self) -> &JwtManager {
        &self.jwt
    }
}

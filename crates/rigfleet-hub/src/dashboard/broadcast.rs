//! Pool of dashboard subscribers and the fan-out task feeding them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use rigfleet_core::protocol::DashboardPush;

use crate::events::HubEvent;
use crate::telemetry::TelemetryStore;

pub type SubscriberId = u64;

struct Subscriber {
    user_id: String,
    tx: mpsc::Sender<DashboardPush>,
}

/// Authenticated dashboard observers.
///
/// Every subscriber owns a bounded queue. Pushes never wait on a slow
/// subscriber: a full or closed queue drops that subscriber, and the client
/// is expected to reconnect and resync from the initial `rigs` push.
pub struct DashboardHub {
    telemetry: Arc<TelemetryStore>,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl DashboardHub {
    pub fn new(telemetry: Arc<TelemetryStore>, queue_capacity: usize) -> Self {
        Self {
            telemetry,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a subscriber. Its queue starts with the full fleet snapshot.
    pub async fn subscribe(&self, user_id: &str) -> (SubscriberId, mpsc::Receiver<DashboardPush>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Snapshot and insert under the pool lock so no push slips between them.
        let mut subscribers = self.subscribers.write().await;
        let rigs = self.telemetry.list().await;
        if tx.try_send(DashboardPush::Rigs(rigs)).is_err() {
            warn!(subscriber_id = id, "Initial snapshot did not fit subscriber queue");
        }
        subscribers.insert(
            id,
            Subscriber {
                user_id: user_id.to_string(),
                tx,
            },
        );
        info!(subscriber_id = id, user_id = %user_id, "Dashboard subscribed");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id);
        if let Some(sub) = &removed {
            info!(subscriber_id = id, user_id = %sub.user_id, "Dashboard unsubscribed");
        }
        removed.is_some()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Queue a push for every subscriber. Returns how many accepted it.
    pub async fn broadcast(&self, push: &DashboardPush) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sub) in subscribers.iter() {
                match sub.tx.try_send(push.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(subscriber_id = id, user_id = %sub.user_id, "Dashboard queue overflowed, dropping subscriber");
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(subscriber_id = id, "Dashboard queue closed");
                        dropped.push(*id);
                    }
                }
            }
        }
        if !dropped.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dropped {
                subscribers.remove(&id);
            }
        }
        delivered
    }

    /// Translate one internal event into a dashboard push.
    pub async fn handle_event(&self, event: HubEvent) {
        let push = match event {
            HubEvent::StatusChanged(_) => DashboardPush::Rigs(self.telemetry.list().await),
            HubEvent::Stats(snapshot) => DashboardPush::Stats(snapshot),
            HubEvent::Alert(alert) => DashboardPush::Alert(alert),
        };
        self.broadcast(&push).await;
    }

    /// Consume the event feed until it closes or `shutdown` changes.
    pub async fn run_fanout(
        self: Arc<Self>,
        mut events: broadcast::Receiver<HubEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dashboard fan-out lagged, resyncing subscribers");
                        let rigs = self.telemetry.list().await;
                        self.broadcast(&DashboardPush::Rigs(rigs)).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Dashboard fan-out stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::storage::HubDatabase;
    use rigfleet_core::RigStatus;
    use rigfleet_core::telemetry::{GpuStats, StatsReport};
    use std::time::Duration;

    async fn telemetry() -> (Arc<TelemetryStore>, EventBus) {
        let db = HubDatabase::open_in_memory().await.unwrap();
        db.create_rig("r1", "garage-1", "h1").await.unwrap();
        db.create_rig("r2", "garage-2", "h2").await.unwrap();
        let events = EventBus::new(64);
        let store = Arc::new(TelemetryStore::new(db, events.clone(), 85.0));
        store.load_from_db().await.unwrap();
        (store, events)
    }

    #[tokio::test]
    async fn subscriber_starts_with_full_list() {
        let (store, _events) = telemetry().await;
        let hub = DashboardHub::new(store, 8);

        let (_id, mut rx) = hub.subscribe("operator-1").await;
        let DashboardPush::Rigs(rigs) = rx.recv().await.unwrap() else {
            panic!("expected rigs push");
        };
        assert_eq!(rigs.len(), 2);
        assert_eq!(hub.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn status_change_pushes_full_list_stats_push_single() {
        let (store, _events) = telemetry().await;
        let hub = DashboardHub::new(Arc::clone(&store), 8);
        let (_id, mut rx) = hub.subscribe("operator-1").await;
        rx.recv().await.unwrap();

        store.set_status("r1", RigStatus::Online).await;
        let snap = store.get("r1").await.unwrap();
        hub.handle_event(HubEvent::StatusChanged(snap.clone())).await;
        hub.handle_event(HubEvent::Stats(snap)).await;

        let DashboardPush::Rigs(rigs) = rx.recv().await.unwrap() else {
            panic!("expected rigs push");
        };
        assert_eq!(rigs[0].status, RigStatus::Online);
        let DashboardPush::Stats(single) = rx.recv().await.unwrap() else {
            panic!("expected stats push");
        };
        assert_eq!(single.rig_id, "r1");
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_others_keep_receiving() {
        let (store, _events) = telemetry().await;
        let hub = DashboardHub::new(Arc::clone(&store), 2);
        let (_slow, _slow_rx) = hub.subscribe("slow").await;
        let (_fast, mut fast_rx) = hub.subscribe("fast").await;
        fast_rx.recv().await.unwrap();

        let snap = store.get("r1").await.unwrap();
        // Slow queue already holds the initial list: one more fits, the next overflows.
        for _ in 0..2 {
            hub.broadcast(&DashboardPush::Stats(snap.clone())).await;
            fast_rx.recv().await.unwrap();
        }

        assert_eq!(hub.subscriber_count().await, 1);
        assert_eq!(hub.broadcast(&DashboardPush::Stats(snap)).await, 1);
    }

    #[tokio::test]
    async fn closed_subscriber_is_removed() {
        let (store, _events) = telemetry().await;
        let hub = DashboardHub::new(store, 8);
        let (_id, rx) = hub.subscribe("operator-1").await;
        drop(rx);

        let delivered = hub
            .broadcast(&DashboardPush::Error {
                message: "x".into(),
            })
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn fanout_forwards_feed_and_stops_on_shutdown() {
        let (store, events) = telemetry().await;
        let hub = Arc::new(DashboardHub::new(Arc::clone(&store), 16));
        let (_id, mut rx) = hub.subscribe("operator-1").await;
        rx.recv().await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&hub).run_fanout(events.subscribe(), shutdown_rx));

        store.set_status("r2", RigStatus::Online).await;
        let push = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(push, DashboardPush::Rigs(_)));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn lagged_feed_resyncs_with_full_list() {
        let (store, _events) = telemetry().await;
        let hub = Arc::new(DashboardHub::new(Arc::clone(&store), 16));
        let (_id, mut rx) = hub.subscribe("operator-1").await;
        rx.recv().await.unwrap();

        let tiny = EventBus::new(1);
        let feed = tiny.subscribe();
        let snap = store.get("r1").await.unwrap();
        for _ in 0..3 {
            tiny.publish(HubEvent::Stats(snap.clone()));
        }

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&hub).run_fanout(feed, shutdown_rx));

        let push = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(push, DashboardPush::Rigs(_)));
    }

    #[tokio::test]
    async fn early_and_late_subscribers_agree_on_fleet_state() {
        let (store, events) = telemetry().await;
        let hub = Arc::new(DashboardHub::new(Arc::clone(&store), 32));
        let (_early, mut early_rx) = hub.subscribe("early").await;

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&hub).run_fanout(events.subscribe(), shutdown_rx));

        store.set_status("r1", RigStatus::Online).await;
        let hot = StatsReport {
            gpus: vec![GpuStats {
                index: 0,
                temperature: Some(93.0),
                hashrate: Some(40e6),
                ..Default::default()
            }],
            ..Default::default()
        };
        store.apply_stats("r1", hot, 10).await.unwrap();
        store.set_status("r2", RigStatus::Online).await;

        let (_late, mut late_rx) = hub.subscribe("late").await;
        let DashboardPush::Rigs(late_view) = late_rx.recv().await.unwrap() else {
            panic!("expected rigs push");
        };

        // Replay everything the early subscriber was pushed.
        let mut early_view = HashMap::new();
        while let Ok(Some(push)) =
            tokio::time::timeout(Duration::from_millis(200), early_rx.recv()).await
        {
            match push {
                DashboardPush::Rigs(rigs) => {
                    early_view = rigs.into_iter().map(|s| (s.rig_id.clone(), s)).collect();
                }
                DashboardPush::Stats(snap) => {
                    early_view.insert(snap.rig_id.clone(), snap);
                }
                _ => {}
            }
        }

        assert_eq!(early_view.len(), late_view.len());
        for snap in &late_view {
            assert_eq!(early_view.get(&snap.rig_id), Some(snap));
        }
        assert_eq!(early_view["r1"].status, RigStatus::Warning);
    }
}

//! Internal event feed between the session layer and dashboard fan-out.

use tokio::sync::broadcast;
use tracing::trace;

use rigfleet_core::TelemetrySnapshot;
use rigfleet_core::protocol::RigAlert;

/// Default capacity of the event feed.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// State changes observers care about.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A rig's status flipped.
    StatusChanged(TelemetrySnapshot),
    /// A rig reported new telemetry.
    Stats(TelemetrySnapshot),
    Alert(RigAlert),
}

/// Multi-consumer event feed. Publishing never blocks.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: HubEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

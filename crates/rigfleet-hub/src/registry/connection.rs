//! In-memory registry of authenticated agent connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use rigfleet_core::protocol::{CommandKind, HubFrame};

use crate::dispatch::CommandReply;

/// Why the hub closed an agent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The same rig authenticated on a newer connection.
    Superseded,
    /// No frame arrived within the hard liveness threshold.
    LivenessTimeout,
    /// The agent stopped draining its outbound queue.
    SlowConsumer,
    /// The hub is shutting down.
    Shutdown,
}

impl CloseReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::LivenessTimeout => "liveness_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::Shutdown => "shutdown",
        }
    }
}

/// How a pending command ended, as seen by the waiting dispatcher.
#[derive(Debug)]
pub enum PendingOutcome {
    Completed(CommandReply),
    Disconnected,
}

struct PendingCommand {
    kind: CommandKind,
    issued_at: Instant,
    deadline: Instant,
    completion: oneshot::Sender<PendingOutcome>,
}

#[derive(Default)]
struct PendingTable {
    commands: HashMap<String, PendingCommand>,
    /// Set once the connection is torn down; later registrations fail at once.
    closed: bool,
}

/// Holds an active, authenticated connection to a rig agent.
pub struct RigConnection {
    pub rig_id: String,
    pub rig_name: String,
    /// Distinguishes this connection from earlier or later ones of the same rig.
    pub connection_id: String,
    pub authenticated_at: Instant,
    last_heartbeat: Mutex<Instant>,
    /// Outbound frames, drained by the connection's writer task.
    frame_tx: mpsc::Sender<HubFrame>,
    close_tx: watch::Sender<Option<CloseReason>>,
    /// Commands written to this connection and still awaiting a result.
    pending: RwLock<PendingTable>,
}

impl RigConnection {
    pub fn new(rig_id: String, rig_name: String, frame_tx: mpsc::Sender<HubFrame>) -> Self {
        let now = Instant::now();
        let (close_tx, _) = watch::channel(None);
        Self {
            rig_id,
            rig_name,
            connection_id: uuid::Uuid::new_v4().to_string(),
            authenticated_at: now,
            last_heartbeat: Mutex::new(now),
            frame_tx,
            close_tx,
            pending: RwLock::new(PendingTable::default()),
        }
    }

    /// Send a frame to the agent.
    pub async fn send_frame(&self, frame: HubFrame) -> Result<(), mpsc::error::SendError<HubFrame>> {
        self.frame_tx.send(frame).await
    }

    /// Record that the agent just proved it is alive.
    pub fn touch(&self) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the agent last proved it is alive.
    pub fn silence(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_heartbeat())
    }

    /// Ask the session owning this connection to close it.
    ///
    /// The first reason wins; later calls are no-ops.
    pub fn close(&self, reason: CloseReason) {
        let changed = self.close_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if changed {
            info!(
                rig_id = %self.rig_id,
                connection_id = %self.connection_id,
                reason = reason.as_str(),
                "Connection close requested"
            );
        }
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_tx.borrow()
    }

    /// Watch for close requests.
    pub fn subscribe_close(&self) -> watch::Receiver<Option<CloseReason>> {
        self.close_tx.subscribe()
    }

    /// Register a pending command and return a receiver for its outcome.
    ///
    /// On a connection that is already torn down the receiver resolves to
    /// `Disconnected` immediately.
    pub async fn register_pending(
        &self,
        command_id: String,
        kind: CommandKind,
        deadline: Instant,
    ) -> oneshot::Receiver<PendingOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.pending.write().await;
        if table.closed {
            let _ = tx.send(PendingOutcome::Disconnected);
            return rx;
        }
        table.commands.insert(
            command_id,
            PendingCommand {
                kind,
                issued_at: Instant::now(),
                deadline,
                completion: tx,
            },
        );
        rx
    }

    /// Resolve a pending command with the agent's reply.
    ///
    /// Returns the command's kind if it was still pending. The reply is
    /// delivered while the table lock is held, so a racing `remove_pending`
    /// either wins outright or observes the reply already sent.
    pub async fn complete_pending(&self, reply: CommandReply) -> Option<CommandKind> {
        let mut table = self.pending.write().await;
        let pending = table.commands.remove(&reply.command_id)?;
        debug!(
            rig_id = %self.rig_id,
            command_id = %reply.command_id,
            command = %pending.kind,
            elapsed_ms = pending.issued_at.elapsed().as_millis(),
            late = Instant::now() > pending.deadline,
            "Command result received"
        );
        let kind = pending.kind;
        if pending.completion.send(PendingOutcome::Completed(reply)).is_err() {
            debug!(rig_id = %self.rig_id, "Command waiter already gone");
        }
        Some(kind)
    }

    /// Drop a pending command without resolving it. Returns whether it was present.
    pub async fn remove_pending(&self, command_id: &str) -> bool {
        self.pending
            .write()
            .await
            .commands
            .remove(command_id)
            .is_some()
    }

    /// Fail every pending command with `Disconnected` and refuse new ones.
    ///
    /// Returns how many commands were failed.
    pub async fn fail_all_pending(&self) -> usize {
        let mut table = self.pending.write().await;
        table.closed = true;
        let failed = table.commands.len();
        for (command_id, pending) in table.commands.drain() {
            debug!(
                rig_id = %self.rig_id,
                command_id = %command_id,
                command = %pending.kind,
                "Failing pending command on disconnect"
            );
            let _ = pending.completion.send(PendingOutcome::Disconnected);
        }
        if failed > 0 {
            warn!(rig_id = %self.rig_id, failed, "Pending commands failed on disconnect");
        }
        failed
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.commands.len()
    }
}

/// Thread-safe registry of active agent connections, at most one per rig.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<RigConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection as the rig's current one.
    ///
    /// A previous connection for the same rig is evicted and asked to close
    /// before the write lock is released; it is returned to the caller.
    pub async fn register(&self, conn: Arc<RigConnection>) -> Option<Arc<RigConnection>> {
        let mut connections = self.connections.write().await;
        let previous = connections.insert(conn.rig_id.clone(), Arc::clone(&conn));
        if let Some(old) = &previous {
            old.close(CloseReason::Superseded);
            info!(
                rig_id = %conn.rig_id,
                old_connection_id = %old.connection_id,
                connection_id = %conn.connection_id,
                "Agent connection superseded"
            );
        } else {
            info!(
                rig_id = %conn.rig_id,
                connection_id = %conn.connection_id,
                "Agent connection registered"
            );
        }
        previous
    }

    /// Remove the rig's connection, but only if `connection_id` is still current.
    ///
    /// Returns `true` if the entry was removed.
    pub async fn unregister(&self, rig_id: &str, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(rig_id) {
            Some(current) if current.connection_id == connection_id => {
                connections.remove(rig_id);
                info!(rig_id = %rig_id, connection_id = %connection_id, "Agent connection unregistered");
                true
            }
            Some(_) => {
                debug!(rig_id = %rig_id, connection_id = %connection_id, "Stale connection left registry already");
                false
            }
            None => false,
        }
    }

    /// Get the current connection of a rig.
    pub async fn get(&self, rig_id: &str) -> Option<Arc<RigConnection>> {
        self.connections.read().await.get(rig_id).cloned()
    }

    /// Refresh the rig's heartbeat timestamp. Returns `false` if it is not connected.
    pub async fn touch(&self, rig_id: &str) -> bool {
        let connections = self.connections.read().await;
        let Some(conn) = connections.get(rig_id) else {
            return false;
        };
        conn.touch();
        true
    }

    pub async fn is_online(&self, rig_id: &str) -> bool {
        self.connections.read().await.contains_key(rig_id)
    }

    /// Snapshot of all current connections.
    pub async fn entries(&self) -> Vec<Arc<RigConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Get all connected rig IDs.
    pub async fn connected_rigs(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Count of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Ask every connection to close.
    pub async fn close_all(&self, reason: CloseReason) {
        for conn in self.connections.read().await.values() {
            conn.close(reason);
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Agent session: one per inbound rig connection.
//!
//! ```text
//! Unauthenticated --auth ok--> Active --close/evict/timeout--> Closed
//!        |                                                      ^
//!        +------ bad token / non-auth frame / auth timeout -----+
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use rigfleet_core::RigStatus;
use rigfleet_core::db::unix_timestamp;
use rigfleet_core::protocol::{AgentFrame, CommandKind, HubFrame};

use super::SessionError;
use crate::auth::hash_token;
use crate::dispatch::CommandReply;
use crate::hub::Hub;
use crate::registry::{CloseReason, RigConnection};

enum SessionState {
    Unauthenticated,
    Active {
        conn: Arc<RigConnection>,
        close_rx: watch::Receiver<Option<CloseReason>>,
    },
    Closed,
}

enum SessionEvent {
    Frame(String),
    Ended,
    Failed(SessionError),
    AuthTimeout,
    CloseRequested(CloseReason),
}

impl SessionEvent {
    fn from_inbound(item: Option<Result<String, SessionError>>) -> Self {
        match item {
            Some(Ok(text)) => Self::Frame(text),
            Some(Err(e)) => Self::Failed(e),
            None => Self::Ended,
        }
    }
}

pub struct AgentSession {
    hub: Hub,
    out_tx: mpsc::Sender<HubFrame>,
    state: SessionState,
}

impl AgentSession {
    /// `out_tx` feeds the connection's writer; frames are delivered in order.
    pub const fn new(hub: Hub, out_tx: mpsc::Sender<HubFrame>) -> Self {
        Self {
            hub,
            out_tx,
            state: SessionState::Unauthenticated,
        }
    }

    /// Drive the session until it reaches `Closed`.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = Result<String, SessionError>> + Unpin,
    {
        let auth_timeout = Duration::from_secs(self.hub.config().server.auth_timeout_secs);
        let auth_deadline = Instant::now() + auth_timeout;

        loop {
            let event = match &mut self.state {
                SessionState::Unauthenticated => {
                    match timeout_at(auth_deadline, inbound.next()).await {
                        Ok(item) => SessionEvent::from_inbound(item),
                        Err(_) => SessionEvent::AuthTimeout,
                    }
                }
                SessionState::Active { close_rx, .. } => {
                    tokio::select! {
                        item = inbound.next() => SessionEvent::from_inbound(item),
                        reason = wait_for_close(close_rx) => SessionEvent::CloseRequested(reason),
                    }
                }
                SessionState::Closed => break,
            };

            let state = std::mem::replace(&mut self.state, SessionState::Closed);
            self.state = self.step(state, event).await;
        }
    }

    async fn step(&self, state: SessionState, event: SessionEvent) -> SessionState {
        match (state, event) {
            (SessionState::Unauthenticated, SessionEvent::Frame(text)) => {
                self.authenticate(&text).await
            }
            (SessionState::Unauthenticated, SessionEvent::AuthTimeout) => {
                debug!("Agent did not authenticate in time");
                self.reject("authentication timeout");
                SessionState::Closed
            }
            (SessionState::Active { conn, close_rx }, SessionEvent::Frame(text)) => {
                self.handle_frame(&conn, &text).await;
                SessionState::Active { conn, close_rx }
            }
            (SessionState::Active { conn, .. }, SessionEvent::CloseRequested(reason)) => {
                self.teardown(&conn, reason.as_str()).await;
                SessionState::Closed
            }
            (SessionState::Active { conn, .. }, SessionEvent::Failed(e)) => {
                warn!(rig_id = %conn.rig_id, error = %e, "Agent transport failed");
                self.teardown(&conn, "transport_error").await;
                SessionState::Closed
            }
            (SessionState::Active { conn, .. }, _) => {
                self.teardown(&conn, "client_closed").await;
                SessionState::Closed
            }
            (SessionState::Unauthenticated | SessionState::Closed, _) => SessionState::Closed,
        }
    }

    /// Handle the first frame. Anything but a valid `auth` closes the session.
    async fn authenticate(&self, text: &str) -> SessionState {
        let token = match AgentFrame::parse(text) {
            Ok(AgentFrame::Auth { token }) => token,
            Ok(other) => {
                debug!(frame = other.kind(), "Agent frame before authentication");
                self.reject("authentication required");
                return SessionState::Closed;
            }
            Err(e) => {
                debug!(error = %e, "Malformed frame before authentication");
                self.reject("authentication required");
                return SessionState::Closed;
            }
        };

        let rig = match self.hub.db().get_rig_by_token_hash(&hash_token(&token)).await {
            Ok(Some(rig)) => rig,
            Ok(None) => {
                warn!("Agent presented an unknown token");
                self.reject("invalid token");
                return SessionState::Closed;
            }
            Err(e) => {
                error!(error = %e, "Token lookup failed");
                self.reject("authentication unavailable");
                return SessionState::Closed;
            }
        };

        let telemetry = self.hub.telemetry();
        telemetry.ensure_rig(&rig.id, &rig.name).await;

        // Acknowledge before registering so no command can overtake it.
        self.send(HubFrame::Authenticated {
            rig_id: rig.id.clone(),
            rig_name: rig.name.clone(),
        });

        let conn = Arc::new(RigConnection::new(
            rig.id.clone(),
            rig.name.clone(),
            self.out_tx.clone(),
        ));
        let close_rx = conn.subscribe_close();
        self.hub.registry().register(Arc::clone(&conn)).await;

        telemetry.mark_seen(&rig.id, unix_timestamp()).await;
        telemetry.set_status(&rig.id, RigStatus::Online).await;

        info!(
            rig_id = %rig.id,
            rig_name = %rig.name,
            connection_id = %conn.connection_id,
            "Agent authenticated"
        );
        SessionState::Active { conn, close_rx }
    }

    async fn handle_frame(&self, conn: &RigConnection, text: &str) {
        let frame = match AgentFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(rig_id = %conn.rig_id, error = %e, "Dropping malformed agent frame");
                return;
            }
        };

        let now = unix_timestamp();
        let telemetry = self.hub.telemetry();

        match frame {
            AgentFrame::Heartbeat => {
                self.hub.registry().touch(&conn.rig_id).await;
                telemetry.mark_seen(&conn.rig_id, now).await;
                if !self.send(HubFrame::HeartbeatAck) {
                    conn.close(CloseReason::SlowConsumer);
                }
            }
            AgentFrame::Stats(report) => {
                self.hub.registry().touch(&conn.rig_id).await;
                telemetry.apply_stats(&conn.rig_id, report, now).await;
            }
            AgentFrame::CommandResult {
                command_id,
                success,
                error,
            } => {
                let reply = CommandReply {
                    command_id: command_id.clone(),
                    success,
                    error,
                };
                match conn.complete_pending(reply).await {
                    Some(CommandKind::Reboot) if success => {
                        telemetry
                            .set_status(&conn.rig_id, RigStatus::Rebooting)
                            .await;
                    }
                    Some(_) => {}
                    None => {
                        debug!(
                            rig_id = %conn.rig_id,
                            command_id = %command_id,
                            "Unmatched command result dropped"
                        );
                    }
                }
            }
            AgentFrame::Auth { .. } => {
                debug!(rig_id = %conn.rig_id, "Ignoring repeated auth frame");
            }
            AgentFrame::Unknown => {
                debug!(rig_id = %conn.rig_id, "Ignoring unknown agent frame type");
            }
        }
    }

    /// Leave the registry and fail whatever is still in flight.
    async fn teardown(&self, conn: &RigConnection, reason: &str) {
        let was_current = self
            .hub
            .registry()
            .unregister(&conn.rig_id, &conn.connection_id)
            .await;
        let failed = conn.fail_all_pending().await;

        if was_current {
            self.hub
                .telemetry()
                .set_status_if(
                    &conn.rig_id,
                    |s| s != RigStatus::Rebooting,
                    RigStatus::Offline,
                )
                .await;
        }

        info!(
            rig_id = %conn.rig_id,
            connection_id = %conn.connection_id,
            reason,
            failed_commands = failed,
            "Agent session closed"
        );
    }

    fn reject(&self, message: &str) {
        self.send(HubFrame::error(message));
    }

    /// Queue a frame without waiting. Returns `false` if it was dropped.
    fn send(&self, frame: HubFrame) -> bool {
        match self.out_tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Agent outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Agent writer already gone");
                false
            }
        }
    }
}

async fn wait_for_close(rx: &mut watch::Receiver<Option<CloseReason>>) -> CloseReason {
    loop {
        if let Some(reason) = *rx.borrow_and_update() {
            return reason;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

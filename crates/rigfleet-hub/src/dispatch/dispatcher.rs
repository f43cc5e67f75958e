//! Sends commands to connected rigs and waits for their results.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use rigfleet_core::protocol::{CommandKind, HubFrame};

use crate::registry::{ConnectionRegistry, PendingOutcome};

/// Result reported by the agent for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    pub command_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Rig not connected: {0}")]
    NotConnected(String),

    #[error("Command timed out: {0}")]
    Timeout(String),

    #[error("Rig disconnected before replying: {0}")]
    Disconnected(String),
}

impl CommandError {
    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "not_connected",
            Self::Timeout(_) => "timeout",
            Self::Disconnected(_) => "disconnected",
        }
    }
}

/// Routes commands through agent connections.
///
/// Commands for rigs that are not connected fail immediately; nothing is
/// queued for later delivery.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        default_timeout: Duration,
        max_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            default_timeout,
            max_timeout,
        }
    }

    /// Deadline actually used for a requested timeout.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Send a command to a rig and wait for its result.
    ///
    /// Resolves with the agent's reply (which may report `success = false`),
    /// or fails with `NotConnected`, `Timeout` or `Disconnected`. Whichever of
    /// reply, deadline and disconnect comes first decides the outcome.
    pub async fn dispatch(
        &self,
        rig_id: &str,
        kind: CommandKind,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<CommandReply, CommandError> {
        let timeout = self.effective_timeout(timeout);
        let command_id = uuid::Uuid::new_v4().to_string();

        let Some(conn) = self.registry.get(rig_id).await else {
            info!(rig_id = %rig_id, command = %kind, "Command rejected, rig not connected");
            return Err(CommandError::NotConnected(rig_id.to_string()));
        };

        let deadline = Instant::now() + timeout;
        let mut outcome_rx = conn
            .register_pending(command_id.clone(), kind, deadline)
            .await;

        let frame = HubFrame::Command {
            id: command_id.clone(),
            command: kind,
            payload,
        };
        match timeout_at(deadline, conn.send_frame(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                conn.remove_pending(&command_id).await;
                return Err(CommandError::Disconnected(rig_id.to_string()));
            }
            Err(_) => {
                conn.remove_pending(&command_id).await;
                warn!(rig_id = %rig_id, command_id = %command_id, "Outbound queue stayed full until the deadline");
                return Err(CommandError::Timeout(command_id));
            }
        }
        info!(
            rig_id = %rig_id,
            command_id = %command_id,
            command = %kind,
            timeout_ms = timeout.as_millis(),
            "Command sent"
        );

        match timeout_at(deadline, &mut outcome_rx).await {
            Ok(Ok(PendingOutcome::Completed(reply))) => Ok(reply),
            Ok(Ok(PendingOutcome::Disconnected) | Err(_)) => {
                warn!(rig_id = %rig_id, command_id = %command_id, "Rig disconnected with command in flight");
                Err(CommandError::Disconnected(rig_id.to_string()))
            }
            Err(_) => {
                if conn.remove_pending(&command_id).await {
                    warn!(rig_id = %rig_id, command_id = %command_id, "Command timed out");
                    return Err(CommandError::Timeout(command_id));
                }
                // Someone else resolved it right at the deadline.
                match outcome_rx.try_recv() {
                    Ok(PendingOutcome::Completed(reply)) => Ok(reply),
                    _ => Err(CommandError::Disconnected(rig_id.to_string())),
                }
            }
        }
    }

    /// Get a reference to the connection registry.
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

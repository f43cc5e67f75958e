//! Wire protocol between the hub, rig agents and dashboards.
//!
//! Every frame is a JSON text message. Agent frames carry a `type` tag;
//! dashboard pushes carry an `event` tag with the payload under `data`.
//! Decoding is tolerant: unknown fields are ignored and unknown frame types
//! decode to an `Unknown` variant instead of failing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::telemetry::{StatsReport, TelemetrySnapshot};

/// Remote operations an agent knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    StartMiner,
    StopMiner,
    RestartMiner,
    Reboot,
    #[serde(rename = "apply_oc")]
    ApplyOverclock,
}

impl CommandKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartMiner => "start_miner",
            Self::StopMiner => "stop_miner",
            Self::RestartMiner => "restart_miner",
            Self::Reboot => "reboot",
            Self::ApplyOverclock => "apply_oc",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frames sent by a rig agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Auth {
        token: String,
    },
    Heartbeat,
    Stats(StatsReport),
    #[serde(rename_all = "camelCase")]
    CommandResult {
        command_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Any `type` this hub does not understand.
    #[serde(other)]
    Unknown,
}

impl AgentFrame {
    /// Decode one text message from an agent.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Heartbeat => "heartbeat",
            Self::Stats(_) => "stats",
            Self::CommandResult { .. } => "command_result",
            Self::Unknown => "unknown",
        }
    }
}

/// Frames the hub sends to a rig agent.
///
/// The `type` key is the frame discriminator, so a command's kind travels
/// under `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    #[serde(rename_all = "camelCase")]
    Authenticated { rig_id: String, rig_name: String },
    Error { message: String },
    HeartbeatAck,
    Command {
        id: String,
        command: CommandKind,
        #[serde(default)]
        payload: Value,
    },
}

impl HubFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Frames sent by a dashboard client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardRequest {
    Auth {
        token: String,
    },
    #[serde(other)]
    Unknown,
}

impl DashboardRequest {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Operator-facing alert raised from rig telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RigAlert {
    pub rig_id: String,
    pub rig_name: String,
    pub level: AlertLevel,
    pub message: String,
    /// Unix seconds when the alert was raised.
    pub raised_at: i64,
}

/// Pushes from the hub to dashboard subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DashboardPush {
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: String },
    Error { message: String },
    /// Full fleet snapshot.
    Rigs(Vec<TelemetrySnapshot>),
    /// One rig's telemetry changed.
    Stats(TelemetrySnapshot),
    Alert(RigAlert),
}

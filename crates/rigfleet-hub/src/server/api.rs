//! REST handlers: health, fleet listing and command submission.

use std::collections::HashSet;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use rigfleet_core::TelemetrySnapshot;
use rigfleet_core::protocol::CommandKind;

use crate::auth::Claims;
use crate::dispatch::{CommandError, CommandReply};
use crate::hub::Hub;

/// Errors returned by REST handlers as `{"error":{"code","message"}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Rig not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Command(e) => {
                let status = match e {
                    CommandError::NotConnected(_) => StatusCode::CONFLICT,
                    CommandError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    CommandError::Disconnected(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.code())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// A rig as the REST surface shows it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RigView {
    #[serde(flatten)]
    pub snapshot: TelemetrySnapshot,
    /// Whether an authenticated agent connection is registered right now.
    pub connected: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub async fn health(State(hub): State<Hub>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rigfleet-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "connectedRigs": hub.registry().connection_count().await,
        "dashboardSubscribers": hub.dashboard().subscriber_count().await,
    }))
}

pub async fn list_rigs(State(hub): State<Hub>) -> Json<Vec<RigView>> {
    let connected: HashSet<String> = hub.registry().connected_rigs().await.into_iter().collect();
    let rigs = hub
        .telemetry()
        .list()
        .await
        .into_iter()
        .map(|snapshot| RigView {
            connected: connected.contains(&snapshot.rig_id),
            snapshot,
        })
        .collect();
    Json(rigs)
}

pub async fn get_rig(
    State(hub): State<Hub>,
    Path(rig_id): Path<String>,
) -> Result<Json<RigView>, ApiError> {
    let snapshot = hub
        .telemetry()
        .get(&rig_id)
        .await
        .ok_or_else(|| ApiError::NotFound(rig_id.clone()))?;
    let connected = hub.registry().is_online(&rig_id).await;
    Ok(Json(RigView {
        snapshot,
        connected,
    }))
}

/// Dispatch a command and answer with the agent's reply.
///
/// An agent-reported failure is still `200`; the body carries
/// `success: false`.
pub async fn send_command(
    State(hub): State<Hub>,
    Path(rig_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandReply>, ApiError> {
    if hub.telemetry().get(&rig_id).await.is_none() {
        return Err(ApiError::NotFound(rig_id));
    }

    info!(
        rig_id = %rig_id,
        user_id = %claims.user_id(),
        token_id = %claims.jti,
        command = request.kind.as_str(),
        "Command requested"
    );
    let reply = hub
        .dispatcher()
        .dispatch(
            &rig_id,
            request.kind,
            request.payload,
            request.timeout_secs.map(Duration::from_secs),
        )
        .await?;
    Ok(Json(reply))
}

//! HTTP surface of the hub: WebSocket endpoints plus a small REST API.

pub mod api;
pub mod interceptor;
pub mod ws;


use axum::{Router, middleware, routing};

use crate::hub::Hub;

pub use api::ApiError;
pub use interceptor::require_bearer;

/// Build the hub's router.
///
/// `/health` and the WebSocket endpoints are public; both WebSocket
/// protocols authenticate with their first frame. `/api/*` needs a bearer JWT.
pub fn router(hub: Hub) -> Router {
    let protected = Router::new()
        .route("/api/rigs", routing::get(api::list_rigs))
        .route("/api/rigs/{rig_id}", routing::get(api::get_rig))
        .route("/api/rigs/{rig_id}/commands", routing::post(api::send_command))
        .layer(middleware::from_fn_with_state(hub.clone(), require_bearer));

    Router::new()
        .route("/health", routing::get(api::health))
        .route("/ws/agent", routing::get(ws::agent_ws))
        .route("/ws/dashboard", routing::get(ws::dashboard_ws))
        .merge(protected)
        .with_state(hub)
}

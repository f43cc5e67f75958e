//! Bearer JWT check for the REST surface.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use super::api::ApiError;
use crate::hub::Hub;

/// Validate `Authorization: Bearer <jwt>` and stash the claims in the
/// request extensions for handlers.
pub async fn require_bearer(
    State(hub): State<Hub>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".into()))?;

    let claims = hub
        .jwt()
        .validate_access(token)
        .map_err(|_| ApiError::Unauthorized("Invalid token".into()))?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}


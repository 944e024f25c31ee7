//! Conversion control handlers.
//!
//! - `POST /api/v1/streams` - start converting a camera feed
//! - `DELETE /api/v1/streams/:session_id` - stop a session
//!
//! Both require an authenticated principal.

use crate::auth::principal::Principal;
use crate::errors::GatewayError;
use crate::models::{StartStreamRequest, StartStreamResponse, StopStreamResponse};
use crate::routes::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use common::types::SessionId;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/streams
///
/// Returns once the first manifest exists, with a delivery URL that embeds
/// a capability scoped to the new session.
///
/// # Response
///
/// - 200 OK with `{ delivery_url, session_id, expires_at }`
/// - 400 Bad Request if the body is malformed
/// - 401 Unauthorized if the principal token is invalid
/// - 403 Forbidden if the principal does not own the camera
/// - 502 / 504 if the transcoder fails or does not become ready in time
/// - 503 during shutdown or when the directory is unreachable
#[instrument(skip_all, name = "sg.handlers.start_stream")]
pub async fn start_stream(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<StartStreamRequest>, JsonRejection>,
) -> Result<Json<StartStreamResponse>, GatewayError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(target: "sg.handlers", error = %e, "Rejected start request body");
        GatewayError::BadRequest("Request body must be a JSON object".to_string())
    })?;

    let target = request
        .into_target()
        .map_err(|reason| GatewayError::BadRequest(reason.to_string()))?;

    let started = state.sessions.start_session(&principal, target).await?;

    Ok(Json(StartStreamResponse {
        delivery_url: started.delivery_url,
        session_id: started.session_id,
        expires_at: started.expires_at,
    }))
}

/// Handler for DELETE /api/v1/streams/:session_id
///
/// Idempotent: stopping a session that no longer exists is acknowledged.
///
/// # Response
///
/// - 200 OK with `{ success: true, message }`
/// - 400 Bad Request if the session id is malformed
/// - 403 Forbidden if the principal does not own the session
#[instrument(skip_all, name = "sg.handlers.stop_stream")]
pub async fn stop_stream(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<StopStreamResponse>, GatewayError> {
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| GatewayError::BadRequest("Invalid session id".to_string()))?;

    let stopped = state.sessions.stop_session(&principal, session_id).await?;

    let message = if stopped {
        "Stream stopped"
    } else {
        "Stream not found or already stopped"
    };

    Ok(Json(StopStreamResponse {
        success: true,
        message: message.to_string(),
    }))
}

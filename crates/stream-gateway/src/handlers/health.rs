//! Liveness probe.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler.
///
/// Reports the number of registered sessions and whether new sessions are
/// admitted. Does not check the directory or the transcoder binary.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = state.sessions.registry();

    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: registry.len().await,
        accepting_sessions: registry.is_accepting(),
    })
}

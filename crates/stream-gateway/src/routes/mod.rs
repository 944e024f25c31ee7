//! HTTP routes for the Stream Gateway.
//!
//! Defines the Axum router and application state.

use crate::auth::principal::PrincipalValidator;
use crate::config::Config;
use crate::errors::GatewayError;
use crate::handlers;
use crate::middleware::{
    http_metrics_middleware, require_auth, require_capability, AccessGateway, AuthState,
};
use crate::services::SessionManager;
use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for the whole router. Longer than the maximum startup
/// deadline so a slow start surfaces as a startup error, not a timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Session lifecycle owner; also exposes the registry.
    pub sessions: Arc<SessionManager>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `POST /api/v1/streams` - Start a conversion - requires a principal token
/// - `DELETE /api/v1/streams/:session_id` - Stop a session - requires a principal token
/// - `GET /streams/:owner/:resource/:session_id/:file` - Manifest and segment
///   delivery - requires a capability
/// - Panics converted to a generic 500
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let validator = Arc::new(PrincipalValidator::new(
        &state.config.auth_jwt_secret,
        state.config.jwt_clock_skew(),
    ));
    let auth_state = Arc::new(AuthState { validator });

    let gateway = Arc::new(AccessGateway::new(
        Arc::clone(state.sessions.capabilities()),
        Arc::clone(state.sessions.registry()),
    ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Control API (principal token required)
    let protected_routes = Router::new()
        .route("/api/v1/streams", post(handlers::start_stream))
        .route("/api/v1/streams/:session_id", delete(handlers::stop_stream))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Artifact delivery (capability required on every fetch)
    let delivery_routes = Router::new()
        .route(
            "/streams/:owner/:resource/:session_id/:file",
            get(handlers::serve_artifact),
        )
        .route_layer(middleware::from_fn_with_state(gateway, require_capability));

    // Layer order (bottom-to-top execution):
    // 1. CatchPanicLayer - Turn handler panics into a 500 (innermost)
    // 2. TraceLayer - Log request details
    // 3. TimeoutLayer - Timeout the request
    // 4. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .merge(delivery_routes)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(http_metrics_middleware))
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    GatewayError::Internal("Request handler panicked".to_string()).into_response()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_config_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Config>();
    }

    #[tokio::test]
    async fn test_panic_becomes_generic_500() {
        let app: Router = Router::new()
            .route(
                "/boom",
                get(|| async { panic!("handler exploded") as () }),
            )
            .layer(CatchPanicLayer::custom(panic_response));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/boom")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert!(!String::from_utf8_lossy(&body).contains("exploded"));
    }
}

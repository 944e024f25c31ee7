//! Stream Gateway error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic; the detail carried by each variant is
//! logged server-side only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stream Gateway error type.
///
/// Maps to HTTP status codes:
/// - `BadRequest`: 400
/// - `Unauthorized`: 401 (with `WWW-Authenticate`)
/// - `Forbidden`: 403
/// - `Internal`: 500
/// - `StartupFailed`: 502
/// - `ShutdownInProgress`, `ServiceUnavailable`: 503
/// - `StartupTimeout`: 504
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Stream startup failed: {0}")]
    StartupFailed(String),

    #[error("Stream startup timed out")]
    StartupTimeout,

    #[error("Shutdown in progress")]
    ShutdownInProgress,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::BadRequest(_) => 400,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::Internal(_) => 500,
            GatewayError::StartupFailed(_) => 502,
            GatewayError::ShutdownInProgress | GatewayError::ServiceUnavailable(_) => 503,
            GatewayError::StartupTimeout => 504,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Validation reasons are fixed strings built by this crate
            GatewayError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            GatewayError::Unauthorized(reason) => {
                tracing::debug!(target: "sg.auth", reason = %reason, "Request unauthorized");
                (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "The access token is invalid or expired".to_string(),
                )
            }
            GatewayError::Forbidden(reason) => {
                tracing::debug!(target: "sg.auth", reason = %reason, "Request forbidden");
                (
                    StatusCode::FORBIDDEN,
                    "FORBIDDEN",
                    "Access to this resource is denied".to_string(),
                )
            }
            GatewayError::StartupFailed(reason) => {
                tracing::warn!(target: "sg.session", reason = %reason, "Stream startup failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "STARTUP_FAILED",
                    "The stream could not be started".to_string(),
                )
            }
            GatewayError::StartupTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "STARTUP_TIMEOUT",
                "The stream did not become ready in time".to_string(),
            ),
            GatewayError::ShutdownInProgress => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                "The service is shutting down".to_string(),
            ),
            GatewayError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "sg.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            GatewayError::Internal(reason) => {
                tracing::error!(target: "sg.internal", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"stream-gateway\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

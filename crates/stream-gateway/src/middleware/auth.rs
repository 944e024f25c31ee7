//! Authentication middleware for the control API.
//!
//! Extracts the Bearer token from the Authorization header, validates it as
//! a principal token and injects the resulting [`Principal`] into request
//! extensions.

use crate::auth::principal::{Principal, PrincipalValidator};
use crate::errors::GatewayError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<PrincipalValidator>,
}

/// Extract the Bearer token from the Authorization header, if any.
pub(crate) fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware for principal tokens.
///
/// # Response
///
/// - Returns 401 Unauthorized if the token is missing or invalid
/// - Continues with `Principal` in extensions if the token is valid
#[instrument(skip_all, name = "sg.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GatewayError> {
    let token = bearer_token(&req).ok_or_else(|| {
        tracing::debug!(target: "sg.middleware.auth", "Missing or malformed Authorization header");
        GatewayError::Unauthorized("Missing Authorization header".to_string())
    })?;

    let principal: Principal = state.validator.validate(token)?;
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::claims::PrincipalClaims;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use common::secret::SecretString;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "principal-secret-principal-secret-00";

    fn app() -> Router {
        let state = Arc::new(AuthState {
            validator: Arc::new(PrincipalValidator::new(
                &SecretString::from(SECRET),
                Duration::from_secs(300),
            )),
        });
        Router::new()
            .route(
                "/whoami",
                get(|Extension(p): Extension<Principal>| async move { p.id }),
            )
            .route_layer(middleware::from_fn_with_state(state, require_auth))
    }

    fn token(sub: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = PrincipalClaims {
            sub: sub.to_string(),
            iat: now,
            exp: now + 600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn call(auth: Option<String>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri("/whoami");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[tokio::test]
    async fn test_valid_token_injects_principal() {
        let (status, body) = call(Some(format!("Bearer {}", token("user-1")))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "user-1");
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let (status, _) = call(None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_scheme_is_unauthorized() {
        let (status, _) = call(Some(format!("Basic {}", token("user-1")))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_garbage_token_is_unauthorized() {
        let (status, _) = call(Some("Bearer not.a.jwt".to_string())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

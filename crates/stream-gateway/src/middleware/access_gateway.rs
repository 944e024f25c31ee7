//! Access Gateway.
//!
//! Every manifest and segment fetch passes through [`require_capability`].
//! A fetch is allowed only if it presents a valid, unexpired capability whose
//! {session, owner, resource} tuple matches the requested path and the
//! session is registered and `active`. Every denial produces the same opaque
//! 401; the reason is only logged and counted.

use crate::auth::capability::CapabilityService;
use crate::errors::GatewayError;
use crate::middleware::auth::bearer_token;
use crate::models::StreamPath;
use crate::observability::metrics::record_gateway_denial;
use crate::repositories::{SessionRegistry, SessionState};
use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::IntoResponse,
};
use chrono::Utc;
use common::types::SessionId;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

/// Longest artifact file name served.
const MAX_ARTIFACT_NAME_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingCapability,
    InvalidCapability,
    ScopeMismatch,
    SessionNotLive,
    InvalidArtifact,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::MissingCapability => "missing_capability",
            DenyReason::InvalidCapability => "invalid_capability",
            DenyReason::ScopeMismatch => "scope_mismatch",
            DenyReason::SessionNotLive => "session_not_live",
            DenyReason::InvalidArtifact => "invalid_artifact",
        }
    }
}

/// An allowed fetch. `artifact_path` is built from the registry entry's
/// output directory, never from the raw request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedFetch {
    pub session_id: SessionId,
    pub artifact_path: PathBuf,
}

pub struct AccessGateway {
    capabilities: Arc<CapabilityService>,
    registry: Arc<SessionRegistry>,
}

impl AccessGateway {
    pub fn new(capabilities: Arc<CapabilityService>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            capabilities,
            registry,
        }
    }

    /// Decide whether `capability` grants `target`.
    pub async fn authorize(
        &self,
        target: &StreamPath,
        capability: Option<&str>,
    ) -> Result<AuthorizedFetch, DenyReason> {
        self.authorize_at(target, capability, Utc::now().timestamp())
            .await
    }

    /// [`AccessGateway::authorize`] against an explicit clock (Unix seconds).
    pub async fn authorize_at(
        &self,
        target: &StreamPath,
        capability: Option<&str>,
        now: i64,
    ) -> Result<AuthorizedFetch, DenyReason> {
        let token = capability
            .filter(|t| !t.is_empty())
            .ok_or(DenyReason::MissingCapability)?;

        let scope = self
            .capabilities
            .verify_at(token, now)
            .map_err(|_| DenyReason::InvalidCapability)?;

        let session_id: SessionId = target
            .session_id
            .parse()
            .map_err(|_| DenyReason::ScopeMismatch)?;
        if scope.session_id != session_id
            || scope.owner != target.owner
            || scope.resource != target.resource
        {
            return Err(DenyReason::ScopeMismatch);
        }

        if !is_artifact_name(&target.file) {
            return Err(DenyReason::InvalidArtifact);
        }

        let entry = self
            .registry
            .get(session_id)
            .await
            .ok_or(DenyReason::SessionNotLive)?;
        if entry.state() != SessionState::Active {
            return Err(DenyReason::SessionNotLive);
        }

        Ok(AuthorizedFetch {
            session_id,
            artifact_path: entry.output_dir().join(&target.file),
        })
    }
}

/// A plain manifest or segment name: `[A-Za-z0-9._-]`, no leading dot,
/// `.m3u8` or `.ts` extension.
pub fn is_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ARTIFACT_NAME_LENGTH
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && (name.ends_with(".m3u8") || name.ends_with(".ts"))
}

/// The capability from `?token=`, falling back to a Bearer header.
fn capability_from_request(req: &Request) -> Option<String> {
    let from_query = req.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    });

    from_query
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(req).map(str::to_string))
}

/// Gate an artifact fetch.
///
/// Inserts [`AuthorizedFetch`] into request extensions when allowed.
#[instrument(skip_all, name = "sg.gateway.authorize")]
pub async fn require_capability(
    State(gateway): State<Arc<AccessGateway>>,
    Path(target): Path<StreamPath>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GatewayError> {
    let capability = capability_from_request(&req);

    match gateway.authorize(&target, capability.as_deref()).await {
        Ok(fetch) => {
            req.extensions_mut().insert(fetch);
            Ok(next.run(req).await)
        }
        Err(reason) => {
            record_gateway_denial(reason.as_str());
            tracing::debug!(
                target: "sg.gateway",
                reason = reason.as_str(),
                file = %target.file,
                "Artifact fetch denied"
            );
            Err(GatewayError::Unauthorized(reason.as_str().to_string()))
        }
    }
}

//! Stream Gateway models.
//!
//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use common::types::{is_path_safe_id, SessionId};
use serde::{Deserialize, Serialize};

/// Maximum accepted length of a source locator.
pub const MAX_SOURCE_URI_LENGTH: usize = 2048;

/// Source schemes the transcoder is allowed to open.
///
/// Local files and exotic ffmpeg protocols (`file:`, `concat:`, `pipe:`)
/// are never accepted from callers.
pub const ALLOWED_SOURCE_SCHEMES: &[&str] =
    &["rtsp", "rtsps", "rtmp", "rtmps", "srt", "http", "https"];

/// Request to convert a camera feed.
///
/// Field names from older clients (`rtsp_url`, `camera_id`) are accepted
/// as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct StartStreamRequest {
    /// Network locator of the feed.
    #[serde(default, alias = "rtsp_url")]
    pub source_uri: Option<String>,

    /// Camera identifier, checked against the ownership directory.
    #[serde(default, alias = "camera_id")]
    pub resource_id: Option<String>,
}

/// A conversion request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub source_uri: String,
    pub resource_id: String,
}

impl StartStreamRequest {
    /// Validate the request and extract its target.
    ///
    /// # Errors
    ///
    /// Returns a client-safe reason when a field is missing or malformed.
    pub fn into_target(self) -> Result<StreamTarget, &'static str> {
        let source_uri = self
            .source_uri
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or("source_uri is required")?;
        let resource_id = self
            .resource_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or("resource_id is required")?;

        if source_uri.len() > MAX_SOURCE_URI_LENGTH {
            return Err("source_uri is too long");
        }

        let parsed = url::Url::parse(&source_uri).map_err(|_| "source_uri is not a valid URL")?;
        if !ALLOWED_SOURCE_SCHEMES.contains(&parsed.scheme()) {
            return Err("source_uri scheme is not supported");
        }
        if parsed.host_str().is_none() {
            return Err("source_uri must include a host");
        }

        if !is_path_safe_id(&resource_id) {
            return Err("resource_id contains invalid characters");
        }

        Ok(StreamTarget {
            source_uri,
            resource_id,
        })
    }
}

/// Successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartStreamResponse {
    /// Playlist URL with the capability embedded as `?token=`.
    pub delivery_url: String,

    pub session_id: SessionId,

    /// Capability expiry.
    pub expires_at: DateTime<Utc>,
}

/// Stop acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopStreamResponse {
    pub success: bool,
    pub message: String,
}

/// Health check response.
///
/// Returned by the `/health` endpoint (liveness probe).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests.
    pub status: String,

    /// Number of registered sessions.
    pub active_sessions: usize,

    /// `false` once shutdown began.
    pub accepting_sessions: bool,
}

/// Path parameters of an artifact fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamPath {
    pub owner: String,
    pub resource: String,
    /// Kept as a string so malformed ids are denied like any other
    /// mismatch instead of rejected by the extractor.
    pub session_id: String,
    pub file: String,
}

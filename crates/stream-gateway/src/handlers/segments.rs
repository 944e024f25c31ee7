//! Artifact delivery.
//!
//! Runs behind the access gateway, which has already resolved the file on
//! disk from the session's registry entry.

use crate::middleware::AuthorizedFetch;
use axum::{
    body::Body,
    extract::Request,
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        HeaderValue,
    },
    response::Response,
    Extension,
};
use std::path::Path;
use tower::ServiceExt;
use tower_http::services::ServeFile;

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

fn is_manifest(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "m3u8")
}

/// Handler for GET /streams/:owner/:resource/:session_id/:file
///
/// Streams the file with HLS content types. Manifests are never cached
/// since they change every segment; a segment already pruned by the
/// transcoder is a plain 404.
pub async fn serve_artifact(
    Extension(fetch): Extension<AuthorizedFetch>,
    request: Request,
) -> Response {
    let manifest = is_manifest(&fetch.artifact_path);

    let response = match ServeFile::new(&fetch.artifact_path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };

    let (mut parts, body) = response.into_parts();
    if parts.status.is_success() {
        let content_type = if manifest {
            MANIFEST_CONTENT_TYPE
        } else {
            SEGMENT_CONTENT_TYPE
        };
        parts
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if manifest {
            parts
                .headers
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
    }

    Response::from_parts(parts, body)
}

//! Ownership directory client.
//!
//! The directory is an external PostgREST-style API holding camera records.
//! The gateway only asks it one question before starting a conversion:
//! does `owner` own `resource`?
//!
//! # Security
//!
//! - The service key is sent as both `apikey` and bearer token and never logged
//! - Identifiers are passed as query parameters, never spliced into the path
//! - Timeouts prevent hanging connections

use crate::services::status_sink::{ResourceStatus, StatusSink};
use chrono::Utc;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, instrument, warn};

/// Timeout for directory requests in seconds.
const DIRECTORY_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Table holding camera records.
const CAMERAS_TABLE: &str = "cameras";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipDecision {
    Allow,
    Deny,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory is unavailable: {0}")]
    Unavailable(String),

    #[error("Directory rejected the service credentials")]
    CredentialsRejected,

    #[error("Unexpected directory response: {0}")]
    UnexpectedResponse(String),
}

/// Ownership lookups (enables mocking).
#[async_trait::async_trait]
pub trait OwnershipDirectory: Send + Sync {
    async fn verify_ownership(
        &self,
        owner: &str,
        resource: &str,
    ) -> Result<OwnershipDecision, DirectoryError>;
}

/// HTTP client for the directory REST API.
///
/// Implements both [`OwnershipDirectory`] and [`StatusSink`], which live in
/// the same table.
#[derive(Clone)]
pub struct RestDirectoryClient {
    client: Client,
    base_url: String,
    service_key: SecretString,
}

impl RestDirectoryClient {
    /// Create a new directory client.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::Unavailable` if the HTTP client cannot be built.
    pub fn new(base_url: &str, service_key: SecretString) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DIRECTORY_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "sg.services.directory", error = %e, "Failed to build HTTP client");
                DirectoryError::Unavailable("failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{CAMERAS_TABLE}", self.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let key = self.service_key.expose_secret();
        request.header("apikey", key).bearer_auth(key)
    }

    fn check_status(response: &Response) -> Result<(), DirectoryError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(target: "sg.services.directory", status = %status, "Service key rejected by directory");
            Err(DirectoryError::CredentialsRejected)
        } else if status.is_server_error() {
            warn!(target: "sg.services.directory", status = %status, "Directory returned server error");
            Err(DirectoryError::Unavailable(format!("status {status}")))
        } else {
            warn!(target: "sg.services.directory", status = %status, "Unexpected directory response");
            Err(DirectoryError::UnexpectedResponse(format!("status {status}")))
        }
    }
}

#[async_trait::async_trait]
impl OwnershipDirectory for RestDirectoryClient {
    #[instrument(skip_all, fields(resource = %resource))]
    async fn verify_ownership(
        &self,
        owner: &str,
        resource: &str,
    ) -> Result<OwnershipDecision, DirectoryError> {
        let request = self.client.get(self.table_url()).query(&[
            ("id", format!("eq.{resource}")),
            ("user_id", format!("eq.{owner}")),
            ("select", "id".to_string()),
        ]);

        let response = self.authorized(request).send().await.map_err(|e| {
            warn!(target: "sg.services.directory", error = %e, "Directory request failed");
            DirectoryError::Unavailable(e.to_string())
        })?;

        Self::check_status(&response)?;

        let rows: Vec<serde_json::Value> = response.json().await.map_err(|e| {
            warn!(target: "sg.services.directory", error = %e, "Failed to parse directory response");
            DirectoryError::UnexpectedResponse(e.to_string())
        })?;

        Ok(if rows.is_empty() {
            OwnershipDecision::Deny
        } else {
            OwnershipDecision::Allow
        })
    }
}

#[async_trait::async_trait]
impl StatusSink for RestDirectoryClient {
    #[instrument(skip_all, fields(resource = %resource, status = status.as_str()))]
    async fn update_status(
        &self,
        resource: &str,
        status: ResourceStatus,
    ) -> Result<(), DirectoryError> {
        let now = Utc::now().to_rfc3339();
        let body = match status {
            ResourceStatus::Online => json!({
                "status": status.as_str(),
                "last_connected": now,
                "updated_at": now,
            }),
            ResourceStatus::Offline => json!({
                "status": status.as_str(),
                "updated_at": now,
            }),
        };

        let request = self
            .client
            .patch(self.table_url())
            .query(&[("id", format!("eq.{resource}"))])
            .header("Prefer", "return=minimal")
            .json(&body);

        let response = self.authorized(request).send().await.map_err(|e| {
            warn!(target: "sg.services.directory", error = %e, "Status update request failed");
            DirectoryError::Unavailable(e.to_string())
        })?;

        Self::check_status(&response)
    }
}

/// Mock directory for tests.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock ownership directory.
    pub struct MockDirectory {
        /// `(owner, resource)` pairs that are allowed; `None` allows all.
        allowed: Option<HashSet<(String, String)>>,
        /// Whether to return errors.
        return_error: bool,
        /// Number of calls made.
        call_count: AtomicUsize,
    }

    impl MockDirectory {
        /// Create a mock that allows every pair.
        pub fn allow_all() -> Self {
            Self {
                allowed: None,
                return_error: false,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock that allows exactly the given `(owner, resource)` pairs.
        pub fn allowing(pairs: &[(&str, &str)]) -> Self {
            Self {
                allowed: Some(
                    pairs
                        .iter()
                        .map(|(o, r)| ((*o).to_string(), (*r).to_string()))
                        .collect(),
                ),
                return_error: false,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock that denies everything.
        pub fn denying() -> Self {
            Self::allowing(&[])
        }

        /// Create a mock whose lookups fail.
        pub fn failing() -> Self {
            Self {
                allowed: None,
                return_error: true,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl OwnershipDirectory for MockDirectory {
        async fn verify_ownership(
            &self,
            owner: &str,
            resource: &str,
        ) -> Result<OwnershipDecision, DirectoryError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            if self.return_error {
                return Err(DirectoryError::Unavailable(
                    "Mock directory error".to_string(),
                ));
            }

            let allowed = self
                .allowed
                .as_ref()
                .map_or(true, |set| {
                    set.contains(&(owner.to_string(), resource.to_string()))
                });

            Ok(if allowed {
                OwnershipDecision::Allow
            } else {
                OwnershipDecision::Deny
            })
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_allowing() {
            let mock = MockDirectory::allowing(&[("user-1", "camera-1")]);

            assert_eq!(
                mock.verify_ownership("user-1", "camera-1").await.unwrap(),
                OwnershipDecision::Allow
            );
            assert_eq!(
                mock.verify_ownership("user-2", "camera-1").await.unwrap(),
                OwnershipDecision::Deny
            );
            assert_eq!(mock.call_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_failing() {
            let mock = MockDirectory::failing();
            assert!(mock.verify_ownership("user-1", "camera-1").await.is_err());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RestDirectoryClient {
        RestDirectoryClient::new(&server.uri(), SecretString::from("svc-key")).unwrap()
    }

    #[tokio::test]
    async fn test_owned_camera_is_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/cameras"))
            .and(query_param("id", "eq.camera-1"))
            .and(query_param("user_id", "eq.user-1"))
            .and(query_param("select", "id"))
            .and(header("apikey", "svc-key"))
            .and(header("authorization", "Bearer svc-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "camera-1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let decision = client(&server)
            .verify_ownership("user-1", "camera-1")
            .await
            .unwrap();
        assert_eq!(decision, OwnershipDecision::Allow);
    }

    #[tokio::test]
    async fn test_empty_result_is_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/cameras"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let decision = client(&server)
            .verify_ownership("user-2", "camera-1")
            .await
            .unwrap();
        assert_eq!(decision, OwnershipDecision::Deny);
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server).verify_ownership("user-1", "camera-1").await;
        assert!(matches!(result, Err(DirectoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_rejected_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client(&server).verify_ownership("user-1", "camera-1").await;
        assert!(matches!(result, Err(DirectoryError::CredentialsRejected)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = client(&server).verify_ownership("user-1", "camera-1").await;
        assert!(matches!(result, Err(DirectoryError::UnexpectedResponse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        // Nothing listens on port 9 of the loopback in test environments
        let client = RestDirectoryClient::new("http://127.0.0.1:9", SecretString::from("k")).unwrap();
        let result = client.verify_ownership("user-1", "camera-1").await;
        assert!(matches!(result, Err(DirectoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_online_update_sets_last_connected() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/cameras"))
            .and(query_param("id", "eq.camera-1"))
            .and(header("apikey", "svc-key"))
            .and(body_partial_json(json!({"status": "online"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .update_status("camera-1", ResourceStatus::Online)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("last_connected").is_some());
        assert!(body.get("updated_at").is_some());
    }

    #[tokio::test]
    async fn test_offline_update() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/cameras"))
            .and(body_partial_json(json!({"status": "offline"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .update_status("camera-1", ResourceStatus::Offline)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("last_connected").is_none());
    }

    #[tokio::test]
    async fn test_failed_update_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(client(&server)
            .update_status("camera-1", ResourceStatus::Offline)
            .await
            .is_err());
    }
}

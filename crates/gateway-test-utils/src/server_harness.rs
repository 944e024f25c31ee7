//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning real Stream Gateway instances
//! with a scripted transcoder, mock directory and mock status sink.

use crate::launcher::{ScriptedLauncher, TranscoderBehaviour};
use crate::tokens::{PrincipalTokenBuilder, TEST_AUTH_JWT_SECRET};
use common::secret::SecretString;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use stream_gateway::auth::capability::CapabilityService;
use stream_gateway::config::Config;
use stream_gateway::observability::metrics::init_metrics_recorder;
use stream_gateway::repositories::SessionRegistry;
use stream_gateway::routes::{self, AppState};
use stream_gateway::services::{MockDirectory, MockStatusSink, SessionManager};
use stream_gateway::transcoder::StartupVerifier;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Streaming secret of every test server.
pub const TEST_STREAMING_SECRET: &str = "test-streaming-secret-0123456789abcdef";

/// Verifier poll interval used by test servers.
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Global metrics handle shared by all test servers in a process.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder().unwrap_or_else(|_| {
                // Recorder already installed by another harness in this process
                PrometheusBuilder::new().build_recorder().handle()
            })
        })
        .clone()
}

/// Configures a [`TestGatewayServer`] before it starts.
pub struct TestGatewayServerBuilder {
    behaviour: TranscoderBehaviour,
    directory: MockDirectory,
    startup_timeout_ms: u64,
    capability_ttl_seconds: u64,
}

impl TestGatewayServerBuilder {
    /// Scripted transcoder behaviour for every session.
    pub fn transcoder(mut self, behaviour: TranscoderBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    /// Ownership directory answering for the server.
    pub fn directory(mut self, directory: MockDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn startup_timeout_ms(mut self, ms: u64) -> Self {
        self.startup_timeout_ms = ms;
        self
    }

    pub fn capability_ttl_seconds(mut self, seconds: u64) -> Self {
        self.capability_ttl_seconds = seconds;
        self
    }

    /// Start the server.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Write transcoder output under a fresh temporary directory
    /// - Start the HTTP server in the background
    pub async fn spawn(self) -> Result<TestGatewayServer, anyhow::Error> {
        let output_root = tempfile::tempdir()
            .map_err(|e| anyhow::anyhow!("Failed to create output root: {}", e))?;

        // Bind first so delivery URLs carry the real port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), addr.to_string()),
            ("PUBLIC_BASE_URL".to_string(), format!("http://{}", addr)),
            (
                "HLS_OUTPUT_DIR".to_string(),
                output_root.path().display().to_string(),
            ),
            (
                "STREAMING_SECRET_KEY".to_string(),
                TEST_STREAMING_SECRET.to_string(),
            ),
            (
                "AUTH_JWT_SECRET".to_string(),
                TEST_AUTH_JWT_SECRET.to_string(),
            ),
            (
                "DIRECTORY_URL".to_string(),
                "http://127.0.0.1:9/unused".to_string(),
            ),
            (
                "DIRECTORY_SERVICE_KEY".to_string(),
                "test-service-key".to_string(),
            ),
            (
                "STARTUP_TIMEOUT_MS".to_string(),
                self.startup_timeout_ms.to_string(),
            ),
            (
                "CAPABILITY_TTL_SECONDS".to_string(),
                self.capability_ttl_seconds.to_string(),
            ),
            ("TRANSCODER_KILL_GRACE_MS".to_string(), "500".to_string()),
        ]);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let launcher = Arc::new(ScriptedLauncher::new(self.behaviour));
        let directory = Arc::new(self.directory);
        let status_sink = Arc::new(MockStatusSink::recording());
        let capabilities = Arc::new(CapabilityService::new(
            &SecretString::from(TEST_STREAMING_SECRET),
            config.jwt_clock_skew(),
        ));

        let sessions = Arc::new(
            SessionManager::new(
                &config,
                launcher.clone(),
                capabilities,
                directory.clone(),
                status_sink.clone(),
            )
            .with_verifier(
                StartupVerifier::new(config.startup_timeout()).with_poll_interval(TEST_POLL_INTERVAL),
            ),
        );

        let state = Arc::new(AppState {
            config: config.clone(),
            sessions: sessions.clone(),
        });

        // Build routes using stream-gateway's real route builder
        let app = routes::build_routes(state, metrics_handle());

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(TestGatewayServer {
            addr,
            config,
            sessions,
            launcher,
            directory,
            status_sink,
            output_root,
            _handle: handle,
        })
    }
}

/// Test harness for spawning the Stream Gateway in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<(), anyhow::Error> {
///     let server = TestGatewayServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    config: Config,
    sessions: Arc<SessionManager>,
    launcher: Arc<ScriptedLauncher>,
    directory: Arc<MockDirectory>,
    status_sink: Arc<MockStatusSink>,
    output_root: TempDir,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Builder with defaults: manifest-writing transcoder, directory that
    /// allows everything, 5s startup deadline, 1h capabilities.
    pub fn builder() -> TestGatewayServerBuilder {
        TestGatewayServerBuilder {
            behaviour: TranscoderBehaviour::WritesManifest,
            directory: MockDirectory::allow_all(),
            startup_timeout_ms: 5000,
            capability_ttl_seconds: 3600,
        }
    }

    /// Spawn a server with the default builder settings.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::builder().spawn().await
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.sessions.registry()
    }

    pub fn launcher(&self) -> &ScriptedLauncher {
        &self.launcher
    }

    pub fn directory(&self) -> &MockDirectory {
        &self.directory
    }

    pub fn status_sink(&self) -> &MockStatusSink {
        &self.status_sink
    }

    /// Root under which session output directories are created.
    pub fn output_root(&self) -> &Path {
        self.output_root.path()
    }

    /// A valid principal token for `principal_id`.
    pub fn principal_token(&self, principal_id: &str) -> String {
        PrincipalTokenBuilder::new()
            .for_principal(principal_id)
            .build()
    }

    /// Run the process-wide shutdown sweep, as on SIGTERM.
    pub async fn shutdown_sessions(&self) -> usize {
        self.sessions.shutdown().await
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        // Stop serving immediately; transcoder children are kill_on_drop
        self._handle.abort();
    }
}

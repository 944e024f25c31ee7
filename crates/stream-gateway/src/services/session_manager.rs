//! Session lifecycle orchestration.
//!
//! The manager drives a conversion request from ownership check to issued
//! capability and owns the one cleanup routine, [`SessionManager::teardown`],
//! that every exit path converges on: explicit stop, transcoder exit, failed
//! startup, an abandoned request and process shutdown.

use crate::auth::capability::{CapabilityScope, CapabilityService, IssuedCapability};
use crate::auth::principal::Principal;
use crate::config::Config;
use crate::errors::GatewayError;
use crate::models::StreamTarget;
use crate::observability::metrics::{
    record_session_start, record_session_terminated, set_sessions_active,
};
use crate::repositories::{RegistryError, SessionEntry, SessionRegistry, SessionState};
use crate::services::directory::{OwnershipDecision, OwnershipDirectory};
use crate::services::status_sink::{
    publish_status, publish_status_after, ResourceStatus, StatusSink,
};
use crate::transcoder::{
    ExitEvents, ProcessExit, Readiness, StartupVerifier, TranscoderLauncher, TranscoderSupervisor,
    MANIFEST_FILE_NAME,
};
use chrono::{DateTime, Utc};
use common::types::SessionId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The owner asked for it.
    StopRequested,
    /// The transcoder exited while the session was active.
    ProcessExited(ProcessExit),
    /// Output directory or process could not be created.
    FailedToStart,
    /// No manifest before the startup deadline.
    StartupTimedOut,
    /// The transcoder exited before producing a manifest.
    StartupExited,
    /// Process-wide shutdown sweep.
    Shutdown,
    /// The request that created the session went away mid-startup.
    Abandoned,
}

impl TeardownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TeardownReason::StopRequested => "stop_requested",
            TeardownReason::ProcessExited(_) => "process_exited",
            TeardownReason::FailedToStart => "failed_to_start",
            TeardownReason::StartupTimedOut => "startup_timed_out",
            TeardownReason::StartupExited => "startup_exited",
            TeardownReason::Shutdown => "shutdown",
            TeardownReason::Abandoned => "abandoned",
        }
    }
}

/// A session that reached `active`, as handed back to the caller.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session_id: SessionId,
    /// Playlist URL with the capability embedded.
    pub delivery_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Owns the session lifecycle.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    supervisor: TranscoderSupervisor,
    verifier: StartupVerifier,
    capabilities: Arc<CapabilityService>,
    directory: Arc<dyn OwnershipDirectory>,
    status_sink: Arc<dyn StatusSink>,
    output_root: PathBuf,
    public_base_url: String,
    capability_ttl: Duration,
}

/// Failure inside startup, carrying the response for the caller and the
/// reason recorded by teardown.
type StartupFailure = (GatewayError, TeardownReason);

impl SessionManager {
    pub fn new(
        config: &Config,
        launcher: Arc<dyn TranscoderLauncher>,
        capabilities: Arc<CapabilityService>,
        directory: Arc<dyn OwnershipDirectory>,
        status_sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            supervisor: TranscoderSupervisor::new(launcher, config.kill_grace()),
            verifier: StartupVerifier::new(config.startup_timeout()),
            capabilities,
            directory,
            status_sink,
            output_root: config.output_root.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            capability_ttl: config.capability_ttl(),
        }
    }

    /// Replace the startup verifier (e.g. a shorter poll interval in tests).
    #[must_use]
    pub fn with_verifier(mut self, verifier: StartupVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn capabilities(&self) -> &Arc<CapabilityService> {
        &self.capabilities
    }

    /// Convert `target` for `principal`.
    ///
    /// Returns once the first manifest exists. On any failure after the
    /// session was registered, the session is fully torn down before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// - `ShutdownInProgress` once shutdown began
    /// - `Forbidden` if the directory denies ownership
    /// - `ServiceUnavailable` if the directory cannot be reached
    /// - `StartupFailed` / `StartupTimeout` if the transcoder does not come up
    #[instrument(
        skip_all,
        name = "sg.session.start",
        fields(resource = %target.resource_id, session_id = tracing::field::Empty)
    )]
    pub async fn start_session(
        self: &Arc<Self>,
        principal: &Principal,
        target: StreamTarget,
    ) -> Result<StartedSession, GatewayError> {
        if !self.registry.is_accepting() {
            record_session_start("shutting_down", None);
            return Err(GatewayError::ShutdownInProgress);
        }

        match self
            .directory
            .verify_ownership(&principal.id, &target.resource_id)
            .await
        {
            Ok(OwnershipDecision::Allow) => {}
            Ok(OwnershipDecision::Deny) => {
                record_session_start("forbidden", None);
                return Err(GatewayError::Forbidden(
                    "Principal does not own the requested resource".to_string(),
                ));
            }
            Err(e) => {
                record_session_start("directory_unavailable", None);
                return Err(GatewayError::ServiceUnavailable(format!(
                    "Ownership check failed: {e}"
                )));
            }
        }

        let entry = self
            .registry
            .create(&principal.id, &target.resource_id, &self.output_root)
            .await
            .map_err(|e| {
                record_session_start("rejected", None);
                match e {
                    RegistryError::ShuttingDown => GatewayError::ShutdownInProgress,
                    RegistryError::InvalidIdentifier => {
                        GatewayError::BadRequest("Identifier contains invalid characters".to_string())
                    }
                    RegistryError::InvalidTransition { .. } => GatewayError::Internal(e.to_string()),
                }
            })?;
        let session_id = entry.id();
        // Armed before the next await so no registered session can leak
        let guard = TeardownGuard::arm(Arc::clone(self), session_id);
        tracing::Span::current().record("session_id", tracing::field::display(session_id));
        let started = Instant::now();

        match self.bring_up(&entry, &target.source_uri).await {
            Ok((issued, exits)) => {
                guard.disarm();
                self.spawn_exit_watcher(session_id, exits);
                record_session_start("started", Some(started.elapsed()));

                info!(
                    target: "sg.session",
                    session_id = %session_id,
                    resource = %entry.resource(),
                    startup_ms = %started.elapsed().as_millis(),
                    "Session active"
                );

                Ok(StartedSession {
                    session_id,
                    delivery_url: self.delivery_url(&entry, &issued),
                    expires_at: issued.expires_at,
                })
            }
            Err((err, reason)) => {
                // The guard stays armed until cleanup completed so a dropped
                // request still finishes it.
                if !self.teardown(session_id, reason).await {
                    remove_output_dir(session_id, entry.output_dir()).await;
                }
                guard.disarm();
                record_session_start(outcome_label(&err), Some(started.elapsed()));
                Err(err)
            }
        }
    }

    /// Spawn the transcoder, wait for its first manifest and mint the
    /// capability.
    async fn bring_up(
        &self,
        entry: &Arc<SessionEntry>,
        source_uri: &str,
    ) -> Result<(IssuedCapability, ExitEvents), StartupFailure> {
        tokio::fs::create_dir_all(entry.output_dir())
            .await
            .map_err(|e| {
                (
                    GatewayError::Internal(format!("Failed to create output directory: {e}")),
                    TeardownReason::FailedToStart,
                )
            })?;

        let process = self
            .supervisor
            .spawn(entry.id(), source_uri, entry.output_dir())
            .map_err(|e| {
                (
                    GatewayError::StartupFailed(e.to_string()),
                    TeardownReason::FailedToStart,
                )
            })?;
        let mut exits = process.exit_events();

        {
            let mut session = entry.lock().await;
            if session.state() != SessionState::Starting {
                drop(session);
                process.terminate().await;
                return Err((GatewayError::ShutdownInProgress, TeardownReason::Shutdown));
            }
            if let Err(process) = session.attach_process(process) {
                drop(session);
                process.terminate().await;
                return Err((
                    GatewayError::Internal("Session already owns a transcoder".to_string()),
                    TeardownReason::FailedToStart,
                ));
            }
        }

        let manifest = entry.output_dir().join(MANIFEST_FILE_NAME);
        match self.verifier.await_ready(&manifest, &mut exits).await {
            Readiness::Ready => {}
            Readiness::TimedOut => {
                return Err((GatewayError::StartupTimeout, TeardownReason::StartupTimedOut));
            }
            Readiness::Exited(exit) => {
                if is_stopping(entry) {
                    return Err((GatewayError::ShutdownInProgress, TeardownReason::Shutdown));
                }
                return Err((
                    GatewayError::StartupFailed(format!(
                        "Transcoder exited during startup with code {:?}",
                        exit.code
                    )),
                    TeardownReason::StartupExited,
                ));
            }
        }

        {
            let mut session = entry.lock().await;
            if let Err(e) = session.transition(SessionState::Active) {
                return Err(if is_stopping(entry) {
                    (GatewayError::ShutdownInProgress, TeardownReason::Shutdown)
                } else {
                    (GatewayError::Internal(e.to_string()), TeardownReason::FailedToStart)
                });
            }
            // Published under the entry lock so teardown always finds the
            // handle and orders `offline` after it
            session.set_status_update(publish_status(
                &self.status_sink,
                entry.resource(),
                ResourceStatus::Online,
            ));
        }
        set_sessions_active(self.registry.count_in(SessionState::Active).await);

        let scope = CapabilityScope {
            session_id: entry.id(),
            owner: entry.owner().to_string(),
            resource: entry.resource().to_string(),
        };
        let issued = self
            .capabilities
            .issue(&scope, self.capability_ttl)
            .map_err(|e| (GatewayError::Internal(e.to_string()), TeardownReason::FailedToStart))?;

        Ok((issued, exits))
    }

    fn delivery_url(&self, entry: &SessionEntry, issued: &IssuedCapability) -> String {
        format!(
            "{}/streams/{}/{}/{}/{}?token={}",
            self.public_base_url,
            entry.owner(),
            entry.resource(),
            entry.id(),
            MANIFEST_FILE_NAME,
            issued.token
        )
    }

    /// Tear the session down once its transcoder exits. Never restarts.
    fn spawn_exit_watcher(self: &Arc<Self>, session_id: SessionId, mut exits: ExitEvents) {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let exit = exits.exited().await;
            if manager.teardown(session_id, TeardownReason::ProcessExited(exit)).await {
                warn!(
                    target: "sg.session",
                    session_id = %session_id,
                    exit_code = ?exit.code,
                    "Transcoder exited while session was active"
                );
            }
        });
    }

    /// Stop a session on behalf of its owner.
    ///
    /// Returns `false` if the session was already gone.
    ///
    /// # Errors
    ///
    /// `Forbidden` if `principal` does not own the session; the session is
    /// left untouched.
    #[instrument(skip_all, name = "sg.session.stop", fields(session_id = %session_id))]
    pub async fn stop_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<bool, GatewayError> {
        let Some(entry) = self.registry.get(session_id).await else {
            debug!(target: "sg.session", session_id = %session_id, "Stop for unknown session");
            return Ok(false);
        };

        if entry.owner() != principal.id {
            return Err(GatewayError::Forbidden(
                "Principal does not own the session".to_string(),
            ));
        }

        Ok(self.teardown(session_id, TeardownReason::StopRequested).await)
    }

    /// Release everything a session holds. Idempotent.
    ///
    /// Order: mark `stopping`, terminate and reap the transcoder, remove the
    /// output directory, mark `terminated`, drop the registry entry, publish
    /// `offline`. Returns `true` for the call that completed the teardown.
    ///
    /// A teardown interrupted mid-way leaves the session in `stopping`; the
    /// next call resumes it.
    #[instrument(
        skip_all,
        name = "sg.session.teardown",
        fields(session_id = %session_id, reason = reason.as_str())
    )]
    pub async fn teardown(&self, session_id: SessionId, reason: TeardownReason) -> bool {
        let Some(entry) = self.registry.get(session_id).await else {
            return false;
        };

        let mut session = entry.lock().await;
        let previous = session.state();
        match previous {
            SessionState::Terminated => return false,
            SessionState::Stopping => {
                debug!(target: "sg.session", session_id = %session_id, "Resuming interrupted teardown");
            }
            SessionState::Starting | SessionState::Active => {
                if let Err(e) = session.transition(SessionState::Stopping) {
                    error!(target: "sg.session", session_id = %session_id, error = %e, "Teardown transition rejected");
                    return false;
                }
            }
        }

        if let Some(process) = session.take_process() {
            let exit = process.terminate().await;
            debug!(
                target: "sg.session",
                session_id = %session_id,
                exit_code = ?exit.code,
                "Transcoder released"
            );
        }

        remove_output_dir(session_id, entry.output_dir()).await;

        if let Err(e) = session.transition(SessionState::Terminated) {
            error!(target: "sg.session", session_id = %session_id, error = %e, "Teardown transition rejected");
        }
        let online_update = session.take_status_update();
        drop(session);

        self.registry.remove(session_id).await;
        set_sessions_active(self.registry.count_in(SessionState::Active).await);

        // Only sessions that went `online` are reported `offline`
        if let Some(online_update) = online_update {
            publish_status_after(
                &self.status_sink,
                entry.resource(),
                ResourceStatus::Offline,
                Some(online_update),
            );
        }

        record_session_terminated(reason.as_str());
        info!(
            target: "sg.session",
            session_id = %session_id,
            reason = reason.as_str(),
            "Session terminated"
        );
        true
    }

    /// Close the registry and tear down every live session concurrently.
    ///
    /// Returns the number of sessions this sweep terminated.
    #[instrument(skip_all, name = "sg.session.shutdown")]
    pub async fn shutdown(self: &Arc<Self>) -> usize {
        if self.registry.begin_shutdown().await {
            info!(target: "sg.session", "Registry closed to new sessions");
        }

        let mut sweep = JoinSet::new();
        for entry in self.registry.snapshot().await {
            let manager = Arc::clone(self);
            let session_id = entry.id();
            sweep.spawn(async move { manager.teardown(session_id, TeardownReason::Shutdown).await });
        }

        let mut terminated = 0;
        while let Some(result) = sweep.join_next().await {
            match result {
                Ok(true) => terminated += 1,
                Ok(false) => {}
                Err(e) => error!(target: "sg.session", error = %e, "Shutdown teardown task failed"),
            }
        }

        info!(target: "sg.session", terminated, "Shutdown sweep complete");
        terminated
    }
}

/// Tears a session down if dropped while armed.
///
/// Covers a request future dropped (client gone, panic) between session
/// creation and hand-over.
struct TeardownGuard {
    manager: Option<Arc<SessionManager>>,
    session_id: SessionId,
}

impl TeardownGuard {
    fn arm(manager: Arc<SessionManager>, session_id: SessionId) -> Self {
        Self {
            manager: Some(manager),
            session_id,
        }
    }

    fn disarm(mut self) {
        self.manager = None;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        let session_id = self.session_id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(target: "sg.session", session_id = %session_id, "Startup abandoned, tearing down");
                handle.spawn(async move {
                    manager.teardown(session_id, TeardownReason::Abandoned).await;
                });
            }
            // Without a runtime the process handle's own drop still kills the child
            Err(_) => error!(target: "sg.session", session_id = %session_id, "Startup abandoned outside a runtime"),
        }
    }
}

fn is_stopping(entry: &SessionEntry) -> bool {
    matches!(
        entry.state(),
        SessionState::Stopping | SessionState::Terminated
    )
}

async fn remove_output_dir(session_id: SessionId, dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            target: "sg.session",
            session_id = %session_id,
            error = %e,
            "Failed to remove output directory"
        ),
    }
}

fn outcome_label(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::StartupFailed(_) => "startup_failed",
        GatewayError::StartupTimeout => "startup_timeout",
        GatewayError::ShutdownInProgress => "shutting_down",
        _ => "internal",
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::directory::mock::MockDirectory;
    use crate::services::status_sink::mock::MockStatusSink;
    use common::secret::SecretString;
    use std::collections::HashMap;
    use std::path::Path;
    use tokio::process::Command;

    /// Runs a shell script in place of the transcoder. `$1` is the output dir.
    struct ScriptLauncher(&'static str);

    impl TranscoderLauncher for ScriptLauncher {
        fn command(&self, _source_uri: &str, output_dir: &Path) -> Command {
            let mut command = Command::new("sh");
            command.arg("-c").arg(self.0).arg("sh").arg(output_dir);
            command
        }
    }

    const WRITES_MANIFEST: &str = "printf '#EXTM3U\\n' > \"$1/index.m3u8\"; exec sleep 30";
    const EXITS_IMMEDIATELY: &str = "exit 3";
    const NEVER_READY: &str = "exec sleep 30";
    const EXITS_AFTER_READY: &str = "printf '#EXTM3U\\n' > \"$1/index.m3u8\"; sleep 0.2; exit 0";

    struct Fixture {
        manager: Arc<SessionManager>,
        sink: Arc<MockStatusSink>,
        _root: tempfile::TempDir,
    }

    fn fixture(script: &'static str, startup_timeout_ms: u64) -> Fixture {
        fixture_with_sink(script, startup_timeout_ms, MockStatusSink::recording())
    }

    fn fixture_with_sink(
        script: &'static str,
        startup_timeout_ms: u64,
        sink: MockStatusSink,
    ) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let vars = HashMap::from([
            ("STREAMING_SECRET_KEY".to_string(), "s".repeat(32)),
            ("AUTH_JWT_SECRET".to_string(), "a".repeat(32)),
            ("DIRECTORY_URL".to_string(), "http://127.0.0.1:9".to_string()),
            ("DIRECTORY_SERVICE_KEY".to_string(), "service-key".to_string()),
            (
                "HLS_OUTPUT_DIR".to_string(),
                root.path().display().to_string(),
            ),
            (
                "STARTUP_TIMEOUT_MS".to_string(),
                startup_timeout_ms.to_string(),
            ),
            ("TRANSCODER_KILL_GRACE_MS".to_string(), "500".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let capabilities = Arc::new(CapabilityService::new(
            &SecretString::from("s".repeat(32)),
            Duration::from_secs(300),
        ));
        let sink = Arc::new(sink);

        let manager = SessionManager::new(
            &config,
            Arc::new(ScriptLauncher(script)),
            capabilities,
            Arc::new(MockDirectory::allow_all()),
            sink.clone(),
        )
        .with_verifier(
            StartupVerifier::new(config.startup_timeout())
                .with_poll_interval(Duration::from_millis(20)),
        );

        Fixture {
            manager: Arc::new(manager),
            sink,
            _root: root,
        }
    }

    fn principal(id: &str) -> Principal {
        Principal { id: id.to_string() }
    }

    fn target(resource: &str) -> StreamTarget {
        StreamTarget {
            source_uri: "rtsp://camera.local/live".to_string(),
            resource_id: resource.to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_then_teardown_is_idempotent() {
        let fx = fixture(WRITES_MANIFEST, 5000);
        let started = fx
            .manager
            .start_session(&principal("user-1"), target("camera-1"))
            .await
            .unwrap();

        let entry = fx.manager.registry().get(started.session_id).await.unwrap();
        assert_eq!(entry.state(), SessionState::Active);
        assert!(entry.output_dir().join(MANIFEST_FILE_NAME).exists());
        assert!(started.delivery_url.contains("/streams/user-1/camera-1/"));
        assert!(started.delivery_url.contains("index.m3u8?token="));

        assert!(
            fx.manager
                .teardown(started.session_id, TeardownReason::StopRequested)
                .await
        );
        assert!(
            !fx.manager
                .teardown(started.session_id, TeardownReason::StopRequested)
                .await
        );

        assert_eq!(entry.state(), SessionState::Terminated);
        assert!(!entry.output_dir().exists());
        assert!(fx.manager.registry().get(started.session_id).await.is_none());

        let updates = fx.sink.wait_for_updates(2, Duration::from_secs(2)).await;
        assert_eq!(
            updates,
            vec![
                ("camera-1".to_string(), ResourceStatus::Online),
                ("camera-1".to_string(), ResourceStatus::Offline),
            ]
        );
    }

    #[tokio::test]
    async fn test_early_exit_fails_fast_and_cleans_up() {
        let fx = fixture(EXITS_IMMEDIATELY, 5000);
        let begun = Instant::now();

        let err = fx
            .manager
            .start_session(&principal("user-1"), target("camera-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::StartupFailed(_)));
        assert!(begun.elapsed() < Duration::from_secs(1));
        assert!(fx.manager.registry().is_empty().await);
        // A session that never went active does not flip the camera offline
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fx.sink.updates().await.is_empty());
    }

    #[tokio::test]
    async fn test_startup_timeout_cleans_up() {
        let fx = fixture(NEVER_READY, 300);

        let err = fx
            .manager
            .start_session(&principal("user-1"), target("camera-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::StartupTimeout));
        assert!(fx.manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_stop_by_non_owner_is_forbidden() {
        let fx = fixture(WRITES_MANIFEST, 5000);
        let started = fx
            .manager
            .start_session(&principal("user-1"), target("camera-1"))
            .await
            .unwrap();

        let err = fx
            .manager
            .stop_session(&principal("user-2"), started.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));

        let entry = fx.manager.registry().get(started.session_id).await.unwrap();
        assert_eq!(entry.state(), SessionState::Active);

        assert!(fx
            .manager
            .stop_session(&principal("user-1"), started.session_id)
            .await
            .unwrap());
        assert!(!fx
            .manager
            .stop_session(&principal("user-1"), started.session_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_dropped_request_is_torn_down() {
        let fx = fixture(NEVER_READY, 5000);
        let manager = fx.manager.clone();

        let request = tokio::spawn(async move {
            manager
                .start_session(&principal("user-1"), target("camera-1"))
                .await
        });

        // Wait for the session to be registered, then abandon the request
        let deadline = Instant::now() + Duration::from_secs(2);
        while fx.manager.registry().is_empty().await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fx.manager.registry().len().await, 1);
        request.abort();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !fx.manager.registry().is_empty().await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(fx.manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_sweeps_and_closes() {
        let fx = fixture(WRITES_MANIFEST, 5000);
        for resource in ["camera-1", "camera-2", "camera-3"] {
            fx.manager
                .start_session(&principal("user-1"), target(resource))
                .await
                .unwrap();
        }
        assert_eq!(fx.manager.registry().len().await, 3);

        assert_eq!(fx.manager.shutdown().await, 3);
        assert!(fx.manager.registry().is_empty().await);

        let err = fx
            .manager
            .start_session(&principal("user-1"), target("camera-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ShutdownInProgress));
    }

    #[tokio::test]
    async fn test_offline_is_reported_after_slow_online() {
        let fx = fixture_with_sink(
            WRITES_MANIFEST,
            5000,
            MockStatusSink::slow_online(Duration::from_millis(200)),
        );
        let started = fx
            .manager
            .start_session(&principal("user-1"), target("camera-1"))
            .await
            .unwrap();

        assert!(fx
            .manager
            .stop_session(&principal("user-1"), started.session_id)
            .await
            .unwrap());

        let updates = fx.sink.wait_for_updates(2, Duration::from_secs(2)).await;
        assert_eq!(
            updates,
            vec![
                ("camera-1".to_string(), ResourceStatus::Online),
                ("camera-1".to_string(), ResourceStatus::Offline),
            ]
        );
    }

    #[tokio::test]
    async fn test_racing_stops_shutdown_and_exit_terminate_once() {
        // Later attempts fire closer to (or after) the transcoder's own exit
        for attempt in 0..6u64 {
            let fx = fixture(EXITS_AFTER_READY, 5000);
            let started = fx
                .manager
                .start_session(&principal("user-1"), target("camera-1"))
                .await
                .unwrap();
            let session_id = started.session_id;
            let entry = fx.manager.registry().get(session_id).await.unwrap();

            tokio::time::sleep(Duration::from_millis(attempt * 50)).await;

            let mut racers = JoinSet::new();
            for _ in 0..4 {
                let manager = Arc::clone(&fx.manager);
                racers.spawn(async move {
                    usize::from(
                        manager
                            .teardown(session_id, TeardownReason::StopRequested)
                            .await,
                    )
                });
            }
            let manager = Arc::clone(&fx.manager);
            racers.spawn(async move { manager.shutdown().await });

            let mut completed = 0;
            while let Some(result) = racers.join_next().await {
                completed += result.unwrap();
            }

            if attempt == 0 {
                // Nothing else can have finished the session yet
                assert_eq!(completed, 1);
            } else {
                // The exit watcher may have won instead
                assert!(completed <= 1, "attempt {attempt}: {completed} teardowns completed");
            }

            fx.sink.wait_for_updates(2, Duration::from_secs(2)).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(
                fx.sink.updates().await,
                vec![
                    ("camera-1".to_string(), ResourceStatus::Online),
                    ("camera-1".to_string(), ResourceStatus::Offline),
                ],
                "attempt {attempt}"
            );
            assert_eq!(entry.state(), SessionState::Terminated);
            assert!(fx.manager.registry().is_empty().await);
            assert!(!entry.output_dir().exists());
        }
    }
}

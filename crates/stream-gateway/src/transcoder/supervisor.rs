//! Transcoder process supervision.
//!
//! Each spawned transcoder is owned by a monitor task. The monitor waits for
//! the child to exit or for a stop request, publishes exactly one exit event,
//! and always reaps the child before finishing. Stderr is drained by a
//! separate task so a chatty transcoder can never block on a full pipe.
//!
//! Termination is SIGTERM, then SIGKILL after the grace period. A
//! [`TranscoderProcess`] that is dropped without [`TranscoderProcess::terminate`]
//! still stops its child: the drop cancels the monitor's stop token, and the
//! child is spawned with `kill_on_drop` as a last resort.

use crate::transcoder::launcher::TranscoderLauncher;
use common::types::SessionId;
use futures::StreamExt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, ChildStderr};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest stderr line buffered for logging; longer lines are dropped.
const MAX_STDERR_LINE_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to start transcoder: {0}")]
    FailedToStart(#[source] io::Error),
}

/// How a transcoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` if the process was killed by a signal or its status
    /// could not be collected.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Receiver side of a process's exit event.
///
/// Cloneable; every clone observes the same single exit.
#[derive(Debug, Clone)]
pub struct ExitEvents {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl ExitEvents {
    pub(crate) fn new(rx: watch::Receiver<Option<ProcessExit>>) -> Self {
        Self { rx }
    }

    /// The exit, if it already happened.
    pub fn current(&self) -> Option<ProcessExit> {
        *self.rx.borrow()
    }

    /// Wait until the process has exited.
    ///
    /// Cancel safe. If the monitor disappears without publishing (it panicked
    /// or the runtime is shutting down) an exit without a code is reported.
    pub async fn exited(&mut self) -> ProcessExit {
        loop {
            if let Some(exit) = *self.rx.borrow_and_update() {
                return exit;
            }
            if self.rx.changed().await.is_err() {
                return (*self.rx.borrow()).unwrap_or(ProcessExit { code: None });
            }
        }
    }
}

/// Exclusive handle to one running transcoder.
#[derive(Debug)]
pub struct TranscoderProcess {
    session_id: SessionId,
    pid: Option<u32>,
    exits: ExitEvents,
    stop: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

impl TranscoderProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_events(&self) -> ExitEvents {
        self.exits.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exits.current().is_some()
    }

    /// Stop the transcoder and wait until it has been reaped.
    ///
    /// Safe to call after the process already exited on its own; the
    /// recorded exit is returned without signalling anything.
    pub async fn terminate(mut self) -> ProcessExit {
        self.stop.cancel();

        if let Some(monitor) = self.monitor.take() {
            if let Err(e) = monitor.await {
                warn!(
                    target: "sg.supervisor",
                    session_id = %self.session_id,
                    error = %e,
                    "Transcoder monitor task failed"
                );
            }
        }

        self.exits.exited().await
    }
}

impl Drop for TranscoderProcess {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Spawns and terminates transcoders.
pub struct TranscoderSupervisor {
    launcher: Arc<dyn TranscoderLauncher>,
    kill_grace: Duration,
}

impl TranscoderSupervisor {
    pub fn new(launcher: Arc<dyn TranscoderLauncher>, kill_grace: Duration) -> Self {
        Self {
            launcher,
            kill_grace,
        }
    }

    /// Spawn a transcoder reading `source_uri` and writing into `output_dir`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::FailedToStart` if the executable could not
    /// be started (missing binary, permissions, resource limits).
    pub fn spawn(
        &self,
        session_id: SessionId,
        source_uri: &str,
        output_dir: &Path,
    ) -> Result<TranscoderProcess, SupervisorError> {
        let mut command = self.launcher.command(source_uri, output_dir);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            warn!(
                target: "sg.supervisor",
                session_id = %session_id,
                error = %e,
                "Transcoder failed to start"
            );
            SupervisorError::FailedToStart(e)
        })?;

        let pid = child.id();
        info!(
            target: "sg.supervisor",
            session_id = %session_id,
            pid = ?pid,
            "Transcoder started"
        );

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(session_id, stderr));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let stop = CancellationToken::new();
        let monitor = tokio::spawn(monitor(
            session_id,
            child,
            stop.clone(),
            self.kill_grace,
            exit_tx,
        ));

        Ok(TranscoderProcess {
            session_id,
            pid,
            exits: ExitEvents::new(exit_rx),
            stop,
            monitor: Some(monitor),
        })
    }
}

async fn monitor(
    session_id: SessionId,
    mut child: Child,
    stop: CancellationToken,
    kill_grace: Duration,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = stop.cancelled() => stop_child(session_id, &mut child, kill_grace).await,
    };

    let exit = match status {
        Ok(status) => ProcessExit::from(status),
        Err(e) => {
            warn!(
                target: "sg.supervisor",
                session_id = %session_id,
                error = %e,
                "Failed to collect transcoder exit status"
            );
            ProcessExit { code: None }
        }
    };

    info!(
        target: "sg.supervisor",
        session_id = %session_id,
        exit_code = ?exit.code,
        "Transcoder exited"
    );
    exit_tx.send_replace(Some(exit));
}

async fn stop_child(
    session_id: SessionId,
    child: &mut Child,
    kill_grace: Duration,
) -> io::Result<ExitStatus> {
    // Already exited but not yet reaped
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    send_sigterm(session_id, child);

    if let Ok(status) = tokio::time::timeout(kill_grace, child.wait()).await {
        return status;
    }

    warn!(
        target: "sg.supervisor",
        session_id = %session_id,
        grace_ms = kill_grace.as_millis(),
        "Transcoder ignored SIGTERM, killing"
    );
    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
fn send_sigterm(session_id: SessionId, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw_pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };

    if let Err(e) = kill(Pid::from_raw(raw_pid), Signal::SIGTERM) {
        debug!(
            target: "sg.supervisor",
            session_id = %session_id,
            error = %e,
            "SIGTERM delivery failed"
        );
    }
}

#[cfg(not(unix))]
fn send_sigterm(_session_id: SessionId, _child: &Child) {}

async fn drain_stderr(session_id: SessionId, stderr: ChildStderr) {
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_STDERR_LINE_BYTES);
    let mut lines = FramedRead::new(stderr, codec);

    let mut resuming = false;

    loop {
        match lines.next().await {
            Some(Ok(line)) => {
                resuming = false;
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(target: "sg.transcoder", session_id = %session_id, "{line}");
                }
            }
            // The codec discards up to the next newline and keeps going
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                resuming = true;
                debug!(
                    target: "sg.transcoder",
                    session_id = %session_id,
                    max_bytes = MAX_STDERR_LINE_BYTES,
                    "Oversized stderr line dropped"
                );
            }
            Some(Err(e)) => {
                debug!(
                    target: "sg.transcoder",
                    session_id = %session_id,
                    error = %e,
                    "Transcoder stderr closed"
                );
                break;
            }
            // A decode error is followed by one `None` before reading resumes
            None if resuming => resuming = false,
            None => break,
        }
    }
}

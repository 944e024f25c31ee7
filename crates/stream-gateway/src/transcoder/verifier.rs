//! Startup verification.
//!
//! A transcoder counts as started once its first manifest exists on disk.
//! The verifier races three outcomes and returns whichever happens first:
//! the manifest appears, the process exits, or the deadline elapses.

use crate::transcoder::supervisor::{ExitEvents, ProcessExit};
use std::path::Path;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Interval between manifest existence checks.
pub const MANIFEST_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    Exited(ProcessExit),
}

#[derive(Debug, Clone)]
pub struct StartupVerifier {
    deadline: Duration,
    poll_interval: Duration,
}

impl StartupVerifier {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            poll_interval: MANIFEST_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Wait for `manifest_path` to appear while watching `exits`.
    ///
    /// An exit wins over a manifest observed in the same tick: a dead
    /// transcoder cannot serve a live playlist.
    pub async fn await_ready(&self, manifest_path: &Path, exits: &mut ExitEvents) -> Readiness {
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                exit = exits.exited() => return Readiness::Exited(exit),
                () = &mut deadline => return Readiness::TimedOut,
                _ = ticker.tick() => {
                    match tokio::fs::try_exists(manifest_path).await {
                        Ok(true) => {
                            // Re-check: the process may have died while we were stat-ing
                            if let Some(exit) = exits.current() {
                                return Readiness::Exited(exit);
                            }
                            return Readiness::Ready;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            debug!(
                                target: "sg.verifier",
                                path = %manifest_path.display(),
                                error = %e,
                                "Manifest check failed, retrying"
                            );
                        }
                    }
                }
            }
        }
    }
}

//! Session registry.
//!
//! The single source of truth for "is this session alive". Membership lives
//! in a map behind a `tokio::sync::RwLock` that is only held for map
//! operations, never across other awaits. Each entry carries its own mutex
//! that serializes state transitions and teardown for that one session.
//!
//! # State machine
//!
//! ```text
//! starting --> active --> stopping --> terminated
//!     \___________________^
//! ```
//!
//! Nothing leaves `terminated`.

use crate::transcoder::TranscoderProcess;
use chrono::{DateTime, Utc};
use common::types::{is_path_safe_id, SessionId};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Starting,
    Active,
    Stopping,
    Terminated,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Terminated => "terminated",
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Starting, SessionState::Active)
                | (SessionState::Starting | SessionState::Active, SessionState::Stopping)
                | (SessionState::Stopping, SessionState::Terminated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session registry is closed for shutdown")]
    ShuttingDown,

    #[error("Identifier is not usable as a path segment")]
    InvalidIdentifier,

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

/// One registered session.
///
/// Identity fields are immutable. The state is readable without locking
/// through [`SessionEntry::state`]; changing it requires [`SessionEntry::lock`].
pub struct SessionEntry {
    id: SessionId,
    owner: String,
    resource: String,
    output_dir: PathBuf,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    process: Option<TranscoderProcess>,
    status_update: Option<JoinHandle<()>>,
}

impl SessionEntry {
    fn new(owner: String, resource: String, output_root: &Path) -> Self {
        let id = SessionId::new();
        let output_dir = output_root
            .join(&owner)
            .join(&resource)
            .join(id.to_string());
        let (state, _) = watch::channel(SessionState::Starting);

        Self {
            id,
            owner,
            resource,
            output_dir,
            created_at: Utc::now(),
            state,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Directory the transcoder writes into; exclusive to this session.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state without waiting for the entry lock.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes, e.g. to wait for `terminated`.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Acquire exclusive control of this session.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            entry: self,
            slot: self.slot.lock().await,
        }
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("owner", &"[REDACTED]")
            .field("resource", &self.resource)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to one session's mutable state.
pub struct SessionGuard<'a> {
    entry: &'a SessionEntry,
    slot: MutexGuard<'a, Slot>,
}

impl SessionGuard<'_> {
    pub fn state(&self) -> SessionState {
        self.entry.state()
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: SessionState) -> Result<(), RegistryError> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition { from, to: next });
        }
        self.entry.state.send_replace(next);
        Ok(())
    }

    /// Hand the transcoder to the session. Replaces nothing: a session owns
    /// at most one process for its whole life.
    pub fn attach_process(&mut self, process: TranscoderProcess) -> Result<(), TranscoderProcess> {
        if self.slot.process.is_some() {
            return Err(process);
        }
        self.slot.process = Some(process);
        Ok(())
    }

    pub fn take_process(&mut self) -> Option<TranscoderProcess> {
        self.slot.process.take()
    }

    pub fn has_process(&self) -> bool {
        self.slot.process.is_some()
    }

    /// Remember the last status update published for this session so the
    /// next one can be ordered after it.
    pub fn set_status_update(&mut self, update: JoinHandle<()>) {
        self.slot.status_update = Some(update);
    }

    pub fn take_status_update(&mut self) -> Option<JoinHandle<()>> {
        self.slot.status_update.take()
    }
}

/// Concurrency-safe map of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    accepting: AtomicBool,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Register a new `starting` session for `owner` and `resource`.
    ///
    /// The session's output directory is `output_root/owner/resource/id`; it
    /// is not created here.
    ///
    /// # Errors
    ///
    /// - `ShuttingDown` once [`SessionRegistry::begin_shutdown`] was called
    /// - `InvalidIdentifier` if owner or resource are not path-safe
    pub async fn create(
        &self,
        owner: &str,
        resource: &str,
        output_root: &Path,
    ) -> Result<Arc<SessionEntry>, RegistryError> {
        if !is_path_safe_id(owner) || !is_path_safe_id(resource) {
            return Err(RegistryError::InvalidIdentifier);
        }

        let entry = Arc::new(SessionEntry::new(
            owner.to_string(),
            resource.to_string(),
            output_root,
        ));

        let mut sessions = self.sessions.write().await;
        // Checked under the write lock so a concurrent shutdown sweep
        // cannot miss this entry.
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(RegistryError::ShuttingDown);
        }
        sessions.insert(entry.id(), Arc::clone(&entry));
        Ok(entry)
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session. Returns `false` if it was already gone.
    pub async fn remove(&self, id: SessionId) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// All registered sessions at this instant, for the shutdown sweep.
    pub async fn snapshot(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Visit every registered session. `f` runs with the map read-locked
    /// and must not block.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<SessionEntry>),
    {
        for entry in self.sessions.read().await.values() {
            f(entry);
        }
    }

    /// Number of registered sessions currently in `state`.
    pub async fn count_in(&self, state: SessionState) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| entry.state() == state)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Close the registry to new sessions. Returns `true` on the first call.
    pub async fn begin_shutdown(&self) -> bool {
        let _sessions = self.sessions.write().await;
        self.accepting.swap(false, Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

//! Best-effort camera status publication.
//!
//! Status updates never influence a session: they are spawned off the
//! request path and a failure is only logged. There is no retry.

use crate::services::directory::DirectoryError;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    Online,
    Offline,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Online => "online",
            ResourceStatus::Offline => "offline",
        }
    }
}

/// Receives resource status changes (enables mocking).
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    async fn update_status(
        &self,
        resource: &str,
        status: ResourceStatus,
    ) -> Result<(), DirectoryError>;
}

/// Fire-and-forget status update.
///
/// Must be called from within a tokio runtime.
pub fn publish_status(
    sink: &Arc<dyn StatusSink>,
    resource: &str,
    status: ResourceStatus,
) -> JoinHandle<()> {
    publish_status_after(sink, resource, status, None)
}

/// Fire-and-forget status update delivered only once `previous` finished.
///
/// Chaining through the previous update's handle keeps a resource's updates
/// in order even when the first one is slow.
pub fn publish_status_after(
    sink: &Arc<dyn StatusSink>,
    resource: &str,
    status: ResourceStatus,
    previous: Option<JoinHandle<()>>,
) -> JoinHandle<()> {
    let sink = Arc::clone(sink);
    let resource = resource.to_string();

    tokio::spawn(async move {
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                debug!(
                    target: "sg.services.status",
                    resource = %resource,
                    error = %e,
                    "Previous status update did not complete"
                );
            }
        }

        match sink.update_status(&resource, status).await {
            Ok(()) => debug!(
                target: "sg.services.status",
                resource = %resource,
                status = status.as_str(),
                "Resource status published"
            ),
            Err(e) => warn!(
                target: "sg.services.status",
                resource = %resource,
                status = status.as_str(),
                error = %e,
                "Resource status update failed"
            ),
        }
    })
}

/// Mock status sink for tests.
pub mod mock {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{Mutex, Notify};

    /// Records every update it receives.
    pub struct MockStatusSink {
        updates: Mutex<Vec<(String, ResourceStatus)>>,
        notify: Notify,
        return_error: bool,
        online_delay: Duration,
    }

    impl MockStatusSink {
        /// Create a sink that accepts and records updates.
        pub fn recording() -> Self {
            Self {
                updates: Mutex::new(Vec::new()),
                notify: Notify::new(),
                return_error: false,
                online_delay: Duration::ZERO,
            }
        }

        /// Create a sink that holds every `online` update for `delay` before
        /// recording it, like a slow directory.
        pub fn slow_online(delay: Duration) -> Self {
            Self {
                online_delay: delay,
                ..Self::recording()
            }
        }

        /// Create a sink that records updates and then fails them.
        pub fn failing() -> Self {
            Self {
                return_error: true,
                ..Self::recording()
            }
        }

        /// All updates received so far, in order.
        pub async fn updates(&self) -> Vec<(String, ResourceStatus)> {
            self.updates.lock().await.clone()
        }

        /// Wait until at least `count` updates arrived or `timeout` elapsed,
        /// then return what was received.
        pub async fn wait_for_updates(
            &self,
            count: usize,
            timeout: Duration,
        ) -> Vec<(String, ResourceStatus)> {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let notified = self.notify.notified();
                {
                    let updates = self.updates.lock().await;
                    if updates.len() >= count {
                        return updates.clone();
                    }
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return self.updates().await;
                }
            }
        }
    }

    #[async_trait::async_trait]
    impl StatusSink for MockStatusSink {
        async fn update_status(
            &self,
            resource: &str,
            status: ResourceStatus,
        ) -> Result<(), DirectoryError> {
            if status == ResourceStatus::Online && !self.online_delay.is_zero() {
                tokio::time::sleep(self.online_delay).await;
            }

            self.updates
                .lock()
                .await
                .push((resource.to_string(), status));
            self.notify.notify_waiters();

            if self.return_error {
                return Err(DirectoryError::Unavailable(
                    "Mock status sink error".to_string(),
                ));
            }
            Ok(())
        }
    }
}

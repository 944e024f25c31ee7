//! Service layer for the Stream Gateway.
//!
//! - [`session_manager`] owns the conversion flow and the single teardown path
//! - [`directory`] answers "does this principal own this camera"
//! - [`status_sink`] publishes best-effort camera status updates

pub mod directory;
pub mod session_manager;
pub mod status_sink;

pub use directory::mock::MockDirectory;
pub use directory::{DirectoryError, OwnershipDecision, OwnershipDirectory, RestDirectoryClient};
pub use session_manager::{SessionManager, StartedSession, TeardownReason};
pub use status_sink::mock::MockStatusSink;
pub use status_sink::{publish_status, publish_status_after, ResourceStatus, StatusSink};

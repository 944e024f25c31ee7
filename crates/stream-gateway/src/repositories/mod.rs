//! In-memory state layer for the Stream Gateway.
//!
//! Sessions are not persisted; a restart starts with an empty registry.

pub mod session_registry;

pub use session_registry::{
    RegistryError, SessionEntry, SessionGuard, SessionRegistry, SessionState,
};

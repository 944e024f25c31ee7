//! Stream Gateway Service Library
//!
//! Converts camera feeds into HLS on demand and serves the output only to
//! callers holding a capability for that exact conversion session:
//!
//! - Conversion sessions backed by a supervised transcoder process
//! - Startup verification (first manifest, process exit, or deadline)
//! - Signed, expiring capabilities scoped to {session, owner, resource}
//! - Capability-gated manifest and segment delivery
//! - One cleanup routine for stop, transcoder exit, failed startup and
//!   shutdown
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/*.rs -> handlers/*.rs -> services/*.rs
//!                                                          |
//!                            repositories/ (session registry), transcoder/
//! ```
//!
//! # Modules
//!
//! - `auth` - Capability tokens and principal tokens
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Principal auth, access gateway, HTTP metrics
//! - `models` - Request and response bodies
//! - `observability` - Prometheus metrics
//! - `repositories` - Session registry
//! - `routes` - Axum router setup
//! - `services` - Session manager and directory clients
//! - `transcoder` - Process supervision and startup verification

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod transcoder;

//! Middleware for the Stream Gateway.
//!
//! # Components
//!
//! - `auth` - Principal authentication for the control API
//! - `access_gateway` - Capability check in front of every artifact fetch
//! - `http_metrics` - HTTP request metrics middleware

pub mod access_gateway;
pub mod auth;
pub mod http_metrics;

pub use access_gateway::{require_capability, AccessGateway, AuthorizedFetch, DenyReason};
pub use auth::{require_auth, AuthState};
pub use http_metrics::http_metrics_middleware;

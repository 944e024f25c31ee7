//! Authentication and capability handling.
//!
//! - [`principal`] validates bearer tokens presented on the control API
//! - [`capability`] mints and verifies stream capabilities

pub mod capability;
pub mod claims;
pub mod principal;

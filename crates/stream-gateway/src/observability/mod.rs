//! Observability for the Stream Gateway.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;

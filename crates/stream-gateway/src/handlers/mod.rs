//! HTTP request handlers for the Stream Gateway.

pub mod health;
pub mod metrics;
pub mod segments;
pub mod streams;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use segments::serve_artifact;
pub use streams::{start_stream, stop_stream};

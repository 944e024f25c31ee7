//! # Stream Gateway Test Utilities
//!
//! Shared test utilities for the Stream Gateway service.
//!
//! This crate provides:
//! - Server test harness (`TestGatewayServer` for E2E tests)
//! - Scripted transcoder (`ScriptedLauncher`) standing in for ffmpeg
//! - Principal token builder (`PrincipalTokenBuilder`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestGatewayServer::spawn().await?;
//!     let client = reqwest::Client::new();
//!
//!     let response = client
//!         .post(format!("{}/api/v1/streams", server.url()))
//!         .bearer_auth(server.principal_token("user-1"))
//!         .json(&serde_json::json!({
//!             "source_uri": "rtsp://camera.local/live",
//!             "resource_id": "camera-1",
//!         }))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```
//!
//! The scripted transcoder runs `/bin/sh`, so the harness is Unix-only.

pub mod launcher;
pub mod server_harness;
pub mod tokens;

// Re-export commonly used items
pub use launcher::*;
pub use server_harness::*;
pub use tokens::*;

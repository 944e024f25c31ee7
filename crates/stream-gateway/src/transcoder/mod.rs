//! External transcoder management.
//!
//! - [`launcher`] builds the transcoder command line
//! - [`supervisor`] spawns, monitors and terminates transcoder processes
//! - [`verifier`] waits for the first manifest after spawn

pub mod launcher;
pub mod supervisor;
pub mod verifier;

pub use launcher::{FfmpegLauncher, TranscoderLauncher, MANIFEST_FILE_NAME};
pub use supervisor::{ExitEvents, ProcessExit, SupervisorError, TranscoderProcess, TranscoderSupervisor};
pub use verifier::{Readiness, StartupVerifier};

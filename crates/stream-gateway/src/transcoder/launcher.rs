//! Transcoder command construction.
//!
//! The invocation is fixed; only the source locator and the output directory
//! vary between sessions. Tests substitute their own [`TranscoderLauncher`]
//! to run scripted processes instead of ffmpeg.

use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;

/// Name of the HLS playlist written into each session directory.
pub const MANIFEST_FILE_NAME: &str = "index.m3u8";

/// Target segment duration in seconds.
pub const SEGMENT_SECONDS: u32 = 2;

/// Number of segments kept in the live playlist.
pub const PLAYLIST_SIZE: u32 = 10;

/// Output frame width; height follows the source aspect ratio.
pub const OUTPUT_WIDTH: u32 = 640;

/// Keyframe interval in frames.
pub const GOP_SIZE: u32 = 30;

/// Builds the command that runs one transcoder.
///
/// Implementations only describe the program and its arguments. Stdio,
/// process-group and kill-on-drop settings are applied by the supervisor.
pub trait TranscoderLauncher: Send + Sync {
    fn command(&self, source_uri: &str, output_dir: &Path) -> Command;
}

/// Launches ffmpeg with the gateway's HLS policy.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    binary: String,
}

impl FfmpegLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl TranscoderLauncher for FfmpegLauncher {
    fn command(&self, source_uri: &str, output_dir: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(ffmpeg_args(source_uri, output_dir));
        command
    }
}

/// Arguments for converting `source_uri` into a live HLS playlist under
/// `output_dir`.
pub fn ffmpeg_args(source_uri: &str, output_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostats", "-loglevel", "warning"]
        .into_iter()
        .map(OsString::from)
        .collect();

    if is_rtsp(source_uri) {
        args.extend(["-rtsp_transport", "tcp"].map(OsString::from));
    }

    args.push("-i".into());
    args.push(source_uri.into());

    let encode = [
        "-c:v".to_string(),
        "libx264".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
        "-b:a".to_string(),
        "96k".to_string(),
        "-vf".to_string(),
        format!("scale={OUTPUT_WIDTH}:-2"),
        "-g".to_string(),
        GOP_SIZE.to_string(),
        "-sc_threshold".to_string(),
        "0".to_string(),
        "-hls_time".to_string(),
        SEGMENT_SECONDS.to_string(),
        "-hls_list_size".to_string(),
        PLAYLIST_SIZE.to_string(),
        "-hls_flags".to_string(),
        "delete_segments".to_string(),
        "-hls_segment_type".to_string(),
        "mpegts".to_string(),
        "-hls_segment_filename".to_string(),
        output_dir
            .join("segment%03d.ts")
            .to_string_lossy()
            .into_owned(),
        "-start_number".to_string(),
        "0".to_string(),
        "-f".to_string(),
        "hls".to_string(),
    ];
    args.extend(encode.into_iter().map(OsString::from));

    args.push(output_dir.join(MANIFEST_FILE_NAME).into_os_string());
    args
}

fn is_rtsp(source_uri: &str) -> bool {
    let lower = source_uri.get(..8).unwrap_or(source_uri).to_ascii_lowercase();
    lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
}

//! Scripted transcoder for E2E tests.
//!
//! Replaces ffmpeg with a short `/bin/sh` script that behaves like one
//! phase of a real transcoder run. The output directory is passed as `$1`.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use stream_gateway::transcoder::TranscoderLauncher;
use tokio::process::Command;

/// Playlist written by scripted transcoders that "start".
pub const TEST_MANIFEST: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:2.000000,\nsegment000.ts\n";

/// Bytes of the single segment written next to the manifest.
pub const TEST_SEGMENT: &[u8] = b"\x47test-transport-stream";

const WRITE_OUTPUT: &str = r#"printf '\107test-transport-stream' > "$1/segment000.ts"
printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:2.000000,\nsegment000.ts\n' > "$1/index.m3u8.tmp"
mv "$1/index.m3u8.tmp" "$1/index.m3u8"
"#;

/// What the scripted transcoder does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderBehaviour {
    /// Writes a manifest and a segment, then runs until terminated.
    WritesManifest,
    /// Exits with status 1 before writing anything.
    ExitsImmediately,
    /// Runs until terminated without ever writing a manifest.
    NeverReady,
    /// Writes a manifest, then exits on its own after the given delay.
    ExitsAfterReady(Duration),
    /// Points at an executable that does not exist.
    MissingBinary,
}

/// [`TranscoderLauncher`] running a shell script per [`TranscoderBehaviour`].
pub struct ScriptedLauncher {
    behaviour: TranscoderBehaviour,
    sources: Mutex<Vec<String>>,
}

impl ScriptedLauncher {
    pub fn new(behaviour: TranscoderBehaviour) -> Self {
        Self {
            behaviour,
            sources: Mutex::new(Vec::new()),
        }
    }

    /// Source locators of every launch so far, in order.
    pub fn launched_sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }

    fn script(&self) -> String {
        match self.behaviour {
            TranscoderBehaviour::WritesManifest => format!("{WRITE_OUTPUT}exec sleep 300\n"),
            TranscoderBehaviour::ExitsImmediately => "exit 1\n".to_string(),
            TranscoderBehaviour::NeverReady => "exec sleep 300\n".to_string(),
            TranscoderBehaviour::ExitsAfterReady(delay) => format!(
                "{WRITE_OUTPUT}sleep {:.3}\nexit 0\n",
                delay.as_secs_f64()
            ),
            TranscoderBehaviour::MissingBinary => String::new(),
        }
    }
}

impl TranscoderLauncher for ScriptedLauncher {
    fn command(&self, source_uri: &str, output_dir: &Path) -> Command {
        self.sources.lock().unwrap().push(source_uri.to_string());

        if self.behaviour == TranscoderBehaviour::MissingBinary {
            return Command::new("/nonexistent/stream-gateway-test-transcoder");
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(self.script())
            .arg("sh")
            .arg(output_dir);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn test_writes_manifest_and_segment() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(TranscoderBehaviour::ExitsAfterReady(
            Duration::from_millis(10),
        ));

        let status = launcher
            .command("rtsp://camera.local/live", dir.path())
            .stdout(Stdio::null())
            .status()
            .await
            .unwrap();

        assert!(status.success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("index.m3u8")).unwrap(),
            TEST_MANIFEST
        );
        assert_eq!(
            std::fs::read(dir.path().join("segment000.ts")).unwrap(),
            TEST_SEGMENT
        );
        assert_eq!(
            launcher.launched_sources(),
            vec!["rtsp://camera.local/live".to_string()]
        );
    }

    #[tokio::test]
    async fn test_exits_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(TranscoderBehaviour::ExitsImmediately);

        let status = launcher
            .command("rtsp://camera.local/live", dir.path())
            .status()
            .await
            .unwrap();

        assert_eq!(status.code(), Some(1));
        assert!(!dir.path().join("index.m3u8").exists());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(TranscoderBehaviour::MissingBinary);

        assert!(launcher
            .command("rtsp://camera.local/live", dir.path())
            .spawn()
            .is_err());
    }
}

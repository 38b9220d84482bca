use anyhow::{Context, bail};
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

// Fixed output profile: 320x240 H.264/AAC in a 3GP container
pub const OUTPUT_WIDTH: u32 = 320;
pub const OUTPUT_HEIGHT: u32 = 240;
pub const VIDEO_CODEC: &str = "libx264";
pub const AUDIO_CODEC: &str = "aac";
pub const OUTPUT_EXTENSION: &str = "3gp";

/// Invokes the external conversion tool as a subprocess.
///
/// The binary path comes from configuration so tests can substitute a stub.
/// Paths are passed as discrete arguments, never through a shell.
#[derive(Debug, Clone)]
pub struct Transcoder {
    bin: String,
}

impl Transcoder {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Convert `input` into `output`, blocking this task until the tool exits.
    ///
    /// The exit status and stderr of the tool are the sole success signal;
    /// the output file itself is never inspected.
    pub async fn convert(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        debug!(
            bin = %self.bin,
            input = %input.display(),
            output = %output.display(),
            "Spawning transcoder"
        );

        let result = Command::new(&self.bin)
            .args(transcode_args(input, output))
            .output()
            .await
            .with_context(|| format!("Failed to spawn transcoder '{}'", self.bin))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "Transcoder exited with {}: {}",
                result.status,
                stderr.trim()
            );
        }

        Ok(())
    }
}

fn transcode_args(input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        input.as_os_str().into(),
        "-s".into(),
        format!("{OUTPUT_WIDTH}x{OUTPUT_HEIGHT}").into(),
        "-c:v".into(),
        VIDEO_CODEC.into(),
        "-c:a".into(),
        AUDIO_CODEC.into(),
        output.as_os_str().into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_transcode_args_order() {
        let input = PathBuf::from("uploads/1_in.mp4");
        let output = PathBuf::from("uploads/2_converted.3gp");

        let args = transcode_args(&input, &output);
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();

        assert_eq!(
            args,
            [
                "-y",
                "-i",
                "uploads/1_in.mp4",
                "-s",
                "320x240",
                "-c:v",
                "libx264",
                "-c:a",
                "aac",
                "uploads/2_converted.3gp",
            ]
        );
    }

    #[test]
    fn test_hostile_filename_stays_one_argument() {
        // a name full of shell metacharacters must come through verbatim
        let input = PathBuf::from("uploads/1_a; rm -rf $(x) && echo.mp4");
        let output = PathBuf::from("uploads/2_converted.3gp");

        let args = transcode_args(&input, &output);
        assert_eq!(args.len(), 10);
        assert_eq!(
            args[2].to_str().unwrap(),
            "uploads/1_a; rm -rf $(x) && echo.mp4"
        );
    }
}

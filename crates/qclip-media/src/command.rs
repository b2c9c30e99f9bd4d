//! FFmpeg invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Default ceiling on one FFmpeg run.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Arguments of a single-input, single-output FFmpeg run.
///
/// Always overwrites the output and never reads stdin.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Append `flag value` to the output options.
    pub fn option(mut self, flag: &str, value: impl ToString) -> Self {
        self.output_args.push(flag.to_string());
        self.output_args.push(value.to_string());
        self
    }

    /// Drop all video streams.
    pub fn no_video(mut self) -> Self {
        self.output_args.push("-vn".to_string());
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-v", "error", "-i"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// Runs [`FfmpegCommand`]s with a timeout.
///
/// The child is killed when the run times out or its future is dropped.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Runner that resolves `ffmpeg` from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let binary = which::which(&self.binary).map_err(|_| MediaError::FfmpegNotFound)?;

        if !tokio::fs::try_exists(cmd.input()).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(cmd.input().to_path_buf()));
        }

        let args = cmd.build_args();
        debug!(binary = %binary.display(), args = %args.join(" "), "Running FFmpeg");

        let child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::FfmpegNotFound,
                _ => MediaError::Io(e),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                let secs = self.timeout.as_secs();
                warn!(input = %cmd.input().display(), secs, "FFmpeg timed out, killed");
                return Err(MediaError::Timeout(secs));
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let tail = stderr_tail(&String::from_utf8_lossy(&output.stderr));
        if reports_no_audio(&tail) {
            return Err(MediaError::NoAudioStream(cmd.input().to_path_buf()));
        }
        Err(MediaError::ffmpeg_failed(
            format!("FFmpeg exited with {}", output.status),
            (!tail.is_empty()).then_some(tail),
            output.status.code(),
        ))
    }
}

/// Last non-empty stderr lines, oldest first.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// FFmpeg's wording when `-vn` leaves nothing to write.
fn reports_no_audio(stderr: &str) -> bool {
    stderr.contains("does not contain any stream")
        || stderr.contains("Output file is empty, nothing was encoded")
}

/// Locate `ffmpeg` on `PATH`.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

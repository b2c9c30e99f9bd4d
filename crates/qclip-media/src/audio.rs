//! Audio extraction for speech recognition.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Target format of extracted audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for AudioFormat {
    /// Signed 16-bit little-endian PCM, 16 kHz mono.
    fn default() -> Self {
        Self {
            codec: "pcm_s16le".to_string(),
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

impl AudioFormat {
    /// Build the FFmpeg command that writes `output` from `input` in this format.
    pub fn command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .no_video()
            .option("-acodec", &self.codec)
            .option("-ar", self.sample_rate)
            .option("-ac", self.channels)
    }
}

/// Extract the audio track of `input` into `output`.
///
/// Returns the size of the written file. An empty output is an error.
pub async fn extract_audio(
    runner: &FfmpegRunner,
    input: &Path,
    output: &Path,
    format: &AudioFormat,
) -> MediaResult<u64> {
    let cmd = format.command(input, output);
    debug!(input = %input.display(), output = %output.display(), "Extracting audio");

    runner.run(&cmd).await?;

    let size = tokio::fs::metadata(output)
        .await
        .map_err(|_| MediaError::EmptyOutput(output.to_path_buf()))?
        .len();

    if size == 0 {
        return Err(MediaError::EmptyOutput(output.to_path_buf()));
    }

    info!(output = %output.display(), bytes = size, "Extracted audio");
    Ok(size)
}

/// Extracts a speech-ready audio track from a media file.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Write audio from `input` to `output`; returns the output size in bytes.
    async fn extract(&self, input: &Path, output: &Path) -> MediaResult<u64>;

    /// MIME type of the produced audio.
    fn content_type(&self) -> &'static str {
        "audio/wav"
    }
}

/// [`AudioExtractor`] that shells out to FFmpeg.
pub struct FfmpegAudioExtractor {
    runner: FfmpegRunner,
    format: AudioFormat,
}

impl FfmpegAudioExtractor {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self {
            runner,
            format: AudioFormat::default(),
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }
}

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    async fn extract(&self, input: &Path, output: &Path) -> MediaResult<u64> {
        extract_audio(&self.runner, input, output, &self.format).await
    }
}

//! Media error types.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not available")]
    FfmpegNotFound,

    #[error("{message}")]
    FfmpegFailed {
        message: String,
        /// Tail of FFmpeg's stderr
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Input not found: {0}")]
    FileNotFound(PathBuf),

    /// The input decoded but has no audio track to extract.
    #[error("No audio stream in {0}")]
    NoAudioStream(PathBuf),

    #[error("FFmpeg wrote no audio to {0}")]
    EmptyOutput(PathBuf),

    #[error("FFmpeg timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Stderr tail, when FFmpeg produced one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::FfmpegFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}

//! FFmpeg CLI wrapper for the transform stage.
//!
//! Extracts a mono 16 kHz PCM WAV track from an uploaded video by running
//! the `ffmpeg` binary as a child process.

pub mod audio;
pub mod command;
pub mod error;

pub use audio::{extract_audio, AudioExtractor, AudioFormat, FfmpegAudioExtractor};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};

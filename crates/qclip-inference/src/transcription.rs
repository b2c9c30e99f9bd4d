//! Speech-to-text abstraction.

use async_trait::async_trait;

use crate::error::InferenceResult;

/// Converts recorded audio into text.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Transcribe an audio file. `content_type` is the MIME type of `audio`.
    ///
    /// Audio with no recognizable speech yields an empty string, not an error.
    async fn transcribe(&self, audio: Vec<u8>, content_type: &str) -> InferenceResult<String>;

    /// Short provider name for logs and metrics.
    fn name(&self) -> &'static str;
}

//! Test doubles for the pipeline's provider seams.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qclip_inference::{InferenceError, InferenceResult, Summarizer, Summary, TranscriptionProvider};
use qclip_media::{AudioExtractor, MediaError, MediaResult};

/// Writes fixed bytes as the "extracted" audio.
#[derive(Default)]
pub struct FakeExtractor {
    pub fail: AtomicBool,
    pub panic: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl AudioExtractor for FakeExtractor {
    async fn extract(&self, input: &Path, output: &Path) -> MediaResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic.load(Ordering::SeqCst) {
            panic!("extractor blew up");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::ffmpeg_failed("exit status 1", None, Some(1)));
        }
        let input = tokio::fs::read(input).await?;
        let mut audio = b"RIFF".to_vec();
        audio.extend_from_slice(&input);
        tokio::fs::write(output, &audio).await?;
        Ok(audio.len() as u64)
    }
}

pub struct FakeTranscriber {
    pub transcript: String,
    pub fail: AtomicBool,
    /// Simulated provider latency
    pub delay_ms: AtomicU64,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: transcript.to_string(),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TranscriptionProvider for FakeTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, _content_type: &str) -> InferenceResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(audio.starts_with(b"RIFF"));
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(InferenceError::Api {
                status: 503,
                body: "overloaded".to_string(),
            });
        }
        Ok(self.transcript.clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
pub struct FakeSummarizer {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, transcript: &str) -> InferenceResult<Summary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(InferenceError::Timeout);
        }
        Ok(Summary {
            summary: format!("About: {}", transcript),
            key_points: vec!["first point".to_string()],
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

//! Provider clients for the analysis stages.
//!
//! This crate provides:
//! - [`TranscriptionProvider`] with a Deepgram prerecorded-audio client
//! - [`Summarizer`] with a Gemini `generateContent` client

pub mod deepgram;
pub mod error;
pub mod gemini;
pub mod summarizer;
pub mod transcription;

pub use deepgram::{DeepgramClient, DeepgramConfig};
pub use error::{InferenceError, InferenceResult};
pub use gemini::{GeminiConfig, GeminiSummarizer};
pub use summarizer::{Summarizer, Summary};
pub use transcription::TranscriptionProvider;

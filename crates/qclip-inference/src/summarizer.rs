//! Transcript summarization abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InferenceResult;

/// Summary of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// Produces a short summary and key points from a transcript.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> InferenceResult<Summary>;

    fn name(&self) -> &'static str;
}

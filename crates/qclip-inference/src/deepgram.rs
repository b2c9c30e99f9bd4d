//! Deepgram prerecorded transcription client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{InferenceError, InferenceResult};
use crate::transcription::TranscriptionProvider;

/// Configuration for the Deepgram client.
#[derive(Debug, Clone)]
pub struct DeepgramConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    pub timeout: Duration,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.deepgram.com".to_string(),
            model: "nova-2".to_string(),
            language: "en".to_string(),
            smart_format: true,
            timeout: Duration::from_secs(600),
        }
    }
}

impl DeepgramConfig {
    /// Create config from environment variables. `DEEPGRAM_API_KEY` is required.
    pub fn from_env() -> InferenceResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_key: std::env::var("DEEPGRAM_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| InferenceError::config("DEEPGRAM_API_KEY not set"))?,
            base_url: std::env::var("DEEPGRAM_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("DEEPGRAM_MODEL").unwrap_or(defaults.model),
            language: std::env::var("DEEPGRAM_LANGUAGE").unwrap_or(defaults.language),
            smart_format: defaults.smart_format,
            timeout: std::env::var("DEEPGRAM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    #[serde(default)]
    results: Option<ListenResults>,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

impl ListenResponse {
    /// First alternative of the first channel, or empty.
    fn into_transcript(self) -> String {
        self.results
            .and_then(|r| r.channels.into_iter().next())
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default()
    }
}

/// Deepgram `/v1/listen` client.
#[derive(Clone)]
pub struct DeepgramClient {
    client: Client,
    config: DeepgramConfig,
}

impl DeepgramClient {
    pub fn new(config: DeepgramConfig) -> InferenceResult<Self> {
        if config.api_key.is_empty() {
            return Err(InferenceError::config("Deepgram API key is empty"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InferenceError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> InferenceResult<Self> {
        Self::new(DeepgramConfig::from_env()?)
    }
}

#[async_trait]
impl TranscriptionProvider for DeepgramClient {
    async fn transcribe(&self, audio: Vec<u8>, content_type: &str) -> InferenceResult<String> {
        let url = format!("{}/v1/listen", self.config.base_url.trim_end_matches('/'));
        debug!(model = %self.config.model, bytes = audio.len(), "Calling Deepgram");

        let response = self
            .client
            .post(&url)
            .query(&[
                ("model", self.config.model.as_str()),
                ("smart_format", if self.config.smart_format { "true" } else { "false" }),
                ("language", self.config.language.as_str()),
            ])
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Content-Type", content_type)
            .body(audio)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ListenResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::invalid_response(format!("Deepgram: {}", e)))?;
        let transcript = parsed.into_transcript();

        info!(chars = transcript.len(), "Deepgram transcription complete");
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DeepgramClient {
        DeepgramClient::new(DeepgramConfig {
            api_key: "test-key".to_string(),
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_transcribe_extracts_first_alternative() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/listen"))
            .and(query_param("model", "nova-2"))
            .and(query_param("smart_format", "true"))
            .and(query_param("language", "en"))
            .and(header("authorization", "Token test-key"))
            .and(header("content-type", "audio/wav"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {"channels": [{"alternatives": [
                    {"transcript": "Hello there.", "confidence": 0.98},
                    {"transcript": "Hello their."}
                ]}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .transcribe(b"RIFF".to_vec(), "audio/wav")
            .await
            .unwrap();
        assert_eq!(text, "Hello there.");
    }

    #[tokio::test]
    async fn test_missing_channels_is_empty_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": {"channels": []}})))
            .mount(&server)
            .await;

        let text = client_for(&server).transcribe(vec![0], "audio/wav").await.unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client_for(&server).transcribe(vec![0], "audio/wav").await.unwrap_err();
        match err {
            InferenceError::Api { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(DeepgramClient::new(DeepgramConfig::default()).is_err());
    }
}

//! Jobs API client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use qclip_models::{JobId, JobStatusResponse, SubmitResponse};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::PollerConfig;
use crate::error::{ClientError, ClientResult};

/// Multipart field the API reads the artifact from.
const UPLOAD_FIELD: &str = "video";

/// The two calls a client makes against the API.
#[async_trait]
pub trait JobsApi: Send + Sync {
    /// Upload a file and admit a job.
    async fn submit(&self, path: &Path) -> ClientResult<SubmitResponse>;

    /// Fetch the current status of a job.
    async fn status(&self, job_id: &JobId) -> ClientResult<JobStatusResponse>;
}

/// [`JobsApi`] over HTTP.
#[derive(Clone)]
pub struct HttpJobsApi {
    http: Client,
    base_url: String,
    status_timeout: Duration,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpJobsApi {
    pub fn new(config: &PollerConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.request_timeout)
            .user_agent(concat!("qclip/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            status_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Parse a JSON body, turning non-2xx responses into [`ClientError::Http`]
    /// with the server's `error` message when present.
    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or_else(|_| format!("Request failed: {}", status.as_u16()));
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            let preview: String = text.chars().take(100).collect();
            ClientError::parse(format!("{} in body: {}", e, preview))
        })
    }
}

#[async_trait]
impl JobsApi for HttpJobsApi {
    async fn submit(&self, path: &Path) -> ClientResult<SubmitResponse> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let part = Part::stream_with_length(file, len)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        debug!(path = %path.display(), bytes = len, "Uploading");
        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn status(&self, job_id: &JobId) -> ClientResult<JobStatusResponse> {
        let response = self
            .http
            .get(format!("{}/jobs/{}", self.base_url, job_id))
            .timeout(self.status_timeout)
            .send()
            .await?;

        Self::decode(response).await
    }
}

//! Status responses exchanged between the API and polling clients.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JobId;

/// Job processing status as reported to clients.
///
/// The server only ever derives `Processing` or `Completed`; the other
/// variants exist so clients can interpret every status the protocol allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body of `GET /jobs/:job_id`.
///
/// `result` is kept as raw JSON: a stored document that fails to parse is
/// surfaced as `{"raw": "<text>"}` rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            result: None,
            error: None,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Body of a successful `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

impl SubmitResponse {
    pub fn queued(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_processing_body() {
        let body = serde_json::to_value(JobStatusResponse::processing()).unwrap();
        assert_eq!(body, json!({"status": "processing"}));
    }

    #[test]
    fn test_completed_body() {
        let body =
            serde_json::to_value(JobStatusResponse::completed(json!({"transcription": "hi"})))
                .unwrap();
        assert_eq!(
            body,
            json!({"status": "completed", "result": {"transcription": "hi"}})
        );
    }

    #[test]
    fn test_failed_parses_without_result() {
        let parsed: JobStatusResponse =
            serde_json::from_str(r#"{"status":"failed","error":"boom"}"#).unwrap();
        assert_eq!(parsed.status, JobStatus::Failed);
        assert_eq!(parsed.error.as_deref(), Some("boom"));
        assert!(parsed.status.is_terminal());
    }

    #[test]
    fn test_submit_response_camel_case() {
        let id = JobId::new();
        let body = serde_json::to_value(SubmitResponse::queued(id.clone())).unwrap();
        assert_eq!(body, json!({"jobId": id.as_str(), "status": "queued"}));
    }
}

//! Result document published by the worker.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output of a completed job, stored at `results/<jobId>.json`.
///
/// Its presence in the artifact store is the only completion signal.
/// `summary` may hold a degradation placeholder instead of a real summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub transcription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_points: Option<Vec<String>>,
}

impl JobResult {
    pub fn new(transcription: impl Into<String>) -> Self {
        Self {
            transcription: transcription.into(),
            summary: None,
            key_points: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_key_points(mut self, key_points: Vec<String>) -> Self {
        self.key_points = Some(key_points);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_result_omits_optional_fields() {
        let json = serde_json::to_string(&JobResult::new("hello")).unwrap();
        assert_eq!(json, r#"{"transcription":"hello"}"#);
    }

    #[test]
    fn test_key_points_camel_case() {
        let result = JobResult::new("t")
            .with_summary("s")
            .with_key_points(vec!["a".into(), "b".into()]);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["keyPoints"][1], "b");
        assert_eq!(value["summary"], "s");
    }
}

//! Job identity and the descriptor carried by the delivery queue.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Prefix for uploaded input artifacts.
pub const INPUT_PREFIX: &str = "inputs";

/// Prefix for published result documents.
pub const RESULT_PREFIX: &str = "results";

/// Error returned when a string is not a valid job id.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid job id: {0}")]
pub struct JobIdError(pub String);

/// Unique identifier for a job.
///
/// Always a v4 UUID in canonical hyphenated lowercase form. Minted once at
/// admission and used as the correlation key everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a job id, accepting any UUID spelling and normalizing it.
    pub fn parse(s: &str) -> Result<Self, JobIdError> {
        Uuid::parse_str(s.trim())
            .map(|u| Self(u.hyphenated().to_string()))
            .map_err(|_| JobIdError(s.to_string()))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Storage key of the uploaded input artifact for a job.
pub fn input_key(job_id: &JobId) -> String {
    format!("{}/{}", INPUT_PREFIX, job_id)
}

/// Storage key of the result document for a job.
pub fn result_key(job_id: &JobId) -> String {
    format!("{}/{}.json", RESULT_PREFIX, job_id)
}

/// Immutable message enqueued once per admitted job.
///
/// Delivered at least once; every consumer must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: JobId,
    /// Key of the input artifact in the artifact store
    pub input_ref: String,
    pub created_at: DateTime<Utc>,
}

impl JobDescriptor {
    /// Descriptor for a freshly admitted job whose input lives at the default key.
    pub fn new(job_id: JobId) -> Self {
        let input_ref = input_key(&job_id);
        Self {
            job_id,
            input_ref,
            created_at: Utc::now(),
        }
    }
}

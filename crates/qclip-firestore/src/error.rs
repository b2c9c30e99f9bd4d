//! Firestore error types.

use std::time::Duration;

use thiserror::Error;

pub type FirestoreResult<T> = Result<T, FirestoreError>;

#[derive(Debug, Error)]
pub enum FirestoreError {
    #[error("Firestore not configured: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other 4xx; retrying will not help.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FirestoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Auth(message),
            403 => Self::PermissionDenied(message),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Label used for the request metric.
    pub fn status_label(&self) -> String {
        match self {
            Self::Auth(_) => "401".to_string(),
            Self::PermissionDenied(_) => "403".to_string(),
            Self::RateLimited { .. } => "429".to_string(),
            Self::Rejected { status, .. } | Self::Server { status, .. } => status.to_string(),
            Self::Network(_) => "network".to_string(),
            Self::Config(_) | Self::Json(_) => "client".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            FirestoreError::from_http_status(429, "x"),
            FirestoreError::RateLimited { retry_after: None }
        ));
        assert!(matches!(
            FirestoreError::from_http_status(503, "x"),
            FirestoreError::Server { status: 503, .. }
        ));
        assert!(matches!(
            FirestoreError::from_http_status(404, "x"),
            FirestoreError::Rejected { status: 404, .. }
        ));
        assert!(FirestoreError::from_http_status(500, "x").is_retryable());
        assert!(!FirestoreError::from_http_status(403, "x").is_retryable());
        assert!(!FirestoreError::from_http_status(400, "x").is_retryable());
    }

    #[test]
    fn test_status_label() {
        assert_eq!(FirestoreError::from_http_status(502, "x").status_label(), "502");
        assert_eq!(FirestoreError::config("x").status_label(), "client");
    }
}

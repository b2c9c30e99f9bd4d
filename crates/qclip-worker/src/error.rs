//! Worker error types.

use thiserror::Error;

use crate::stage::Stage;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Fetch failed: {0}")]
    Fetch(#[source] qclip_storage::StorageError),

    #[error("Transform failed: {0}")]
    Transform(#[from] qclip_media::MediaError),

    #[error("Transcription failed: {0}")]
    PrimaryAnalysis(#[from] qclip_inference::InferenceError),

    #[error("Publish failed: {0}")]
    Publish(#[source] qclip_storage::StorageError),

    #[error("Job timed out after {0}s")]
    Timeout(u64),

    #[error("Job task panicked: {0}")]
    Panicked(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] qclip_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn panicked(msg: impl Into<String>) -> Self {
        Self::Panicked(msg.into())
    }

    /// Whether the delivery should be abandoned for redelivery.
    ///
    /// Every failure of a required stage is transient: the input may become
    /// readable, a provider may recover, and the queue bounds redelivery.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkerError::Fetch(_)
                | WorkerError::Transform(_)
                | WorkerError::PrimaryAnalysis(_)
                | WorkerError::Publish(_)
                | WorkerError::Timeout(_)
                | WorkerError::Panicked(_)
                | WorkerError::Io(_)
        )
    }

    /// Required stage the failure belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WorkerError::Fetch(_) => Some(Stage::Fetch),
            WorkerError::Transform(_) => Some(Stage::Transform),
            WorkerError::PrimaryAnalysis(_) => Some(Stage::PrimaryAnalysis),
            WorkerError::Publish(_) => Some(Stage::Publish),
            _ => None,
        }
    }
}

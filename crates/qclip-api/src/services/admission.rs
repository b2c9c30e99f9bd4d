//! Job admission: store the input artifact, then enqueue its descriptor.

use std::path::Path;
use std::sync::Arc;

use qclip_models::{input_key, JobDescriptor, JobId, SubmitResponse};
use qclip_queue::{DeliveryQueue, QueueError};
use qclip_storage::{ArtifactStore, StorageError, CONTENT_TYPE_OCTET};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::metrics;

/// Why a submission was rejected.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("video required")]
    MissingInput,

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("Malformed upload: {0}")]
    Malformed(String),

    #[error("Failed to store input: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to enqueue job: {0}")]
    Enqueue(#[from] QueueError),
}

impl AdmissionError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionError::MissingInput => "missing_input",
            AdmissionError::TooLarge { .. } => "too_large",
            AdmissionError::Malformed(_) => "malformed",
            AdmissionError::Storage(_) => "storage",
            AdmissionError::Enqueue(_) => "enqueue",
        }
    }
}

/// Admits jobs: mints the id, persists the input, enqueues the descriptor.
///
/// The input is always written before the descriptor is enqueued, so a
/// worker never receives a job whose input is missing.
#[derive(Clone)]
pub struct AdmissionService {
    store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn DeliveryQueue>,
    compensate_orphans: bool,
}

impl AdmissionService {
    pub fn new(store: Arc<dyn ArtifactStore>, queue: Arc<dyn DeliveryQueue>) -> Self {
        Self {
            store,
            queue,
            compensate_orphans: false,
        }
    }

    /// Delete the stored input when the enqueue step fails.
    pub fn with_orphan_compensation(mut self, enabled: bool) -> Self {
        self.compensate_orphans = enabled;
        self
    }

    /// Admit an in-memory artifact.
    pub async fn submit(&self, artifact: Vec<u8>) -> Result<SubmitResponse, AdmissionError> {
        if artifact.is_empty() {
            return Err(self.reject(AdmissionError::MissingInput));
        }

        let job_id = JobId::new();
        let key = input_key(&job_id);
        self.store
            .put_bytes(&key, artifact, CONTENT_TYPE_OCTET)
            .await
            .map_err(|e| self.reject(e.into()))?;

        self.dispatch(job_id, key).await
    }

    /// Admit an artifact spooled to a local file of `size` bytes.
    pub async fn submit_file(&self, path: &Path, size: u64) -> Result<SubmitResponse, AdmissionError> {
        if size == 0 {
            return Err(self.reject(AdmissionError::MissingInput));
        }

        let job_id = JobId::new();
        let key = input_key(&job_id);
        self.store
            .put_file(path, &key, CONTENT_TYPE_OCTET)
            .await
            .map_err(|e| self.reject(e.into()))?;
        info!(job_id = %job_id, key = %key, bytes = size, "Stored input artifact");

        self.dispatch(job_id, key).await
    }

    async fn dispatch(&self, job_id: JobId, key: String) -> Result<SubmitResponse, AdmissionError> {
        let descriptor = JobDescriptor::new(job_id.clone());

        match self.queue.enqueue(&descriptor).await {
            Ok(message_id) => {
                info!(job_id = %job_id, message_id = %message_id, "Job queued");
                metrics::record_job_admitted();
                Ok(SubmitResponse::queued(job_id))
            }
            Err(e) => {
                warn!(job_id = %job_id, orphan_key = %key, error = %e, "Enqueue failed; input artifact orphaned");
                if self.compensate_orphans {
                    match self.store.delete(&key).await {
                        Ok(()) => info!(job_id = %job_id, key = %key, "Deleted orphaned input"),
                        Err(del) => error!(job_id = %job_id, key = %key, error = %del, "Failed to delete orphaned input"),
                    }
                }
                Err(self.reject(e.into()))
            }
        }
    }

    fn reject(&self, err: AdmissionError) -> AdmissionError {
        metrics::record_admission_rejected(err.as_str());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qclip_models::JobStatus;
    use qclip_queue::MemoryQueue;
    use qclip_storage::MemoryStore;

    fn service(store: &MemoryStore, queue: &MemoryQueue) -> AdmissionService {
        AdmissionService::new(Arc::new(store.clone()), Arc::new(queue.clone()))
    }

    #[tokio::test]
    async fn test_submit_stores_then_enqueues() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::default();

        let resp = service(&store, &queue).submit(b"video".to_vec()).await.unwrap();

        assert_eq!(resp.status, JobStatus::Queued);
        assert_eq!(store.get(&input_key(&resp.job_id)).unwrap(), b"video");
        let enqueued = queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].job_id, resp.job_id);
        assert_eq!(enqueued[0].input_ref, input_key(&resp.job_id));
    }

    #[tokio::test]
    async fn test_each_submission_gets_a_fresh_id() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::default();
        let svc = service(&store, &queue);

        let a = svc.submit(b"a".to_vec()).await.unwrap();
        let b = svc.submit(b"a".to_vec()).await.unwrap();

        assert_ne!(a.job_id, b.job_id);
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected_without_side_effects() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::default();

        let err = service(&store, &queue).submit(Vec::new()).await.unwrap_err();

        assert!(matches!(err, AdmissionError::MissingInput));
        assert!(store.is_empty());
        assert!(queue.enqueued().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_enqueues_nothing() {
        let store = MemoryStore::new();
        store.fail_puts("inputs/");
        let queue = MemoryQueue::default();

        let err = service(&store, &queue).submit(b"video".to_vec()).await.unwrap_err();

        assert!(matches!(err, AdmissionError::Storage(_)));
        assert!(queue.enqueued().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_leaves_orphan_by_default() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::default();
        queue.set_fail_enqueue(true);

        let err = service(&store, &queue).submit(b"video".to_vec()).await.unwrap_err();

        assert!(matches!(err, AdmissionError::Enqueue(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure_compensates_when_enabled() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::default();
        queue.set_fail_enqueue(true);

        let err = service(&store, &queue)
            .with_orphan_compensation(true)
            .submit(b"video".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::Enqueue(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_enqueue_error() {
        let store = MemoryStore::new();
        store.fail_deletes("inputs/");
        let queue = MemoryQueue::default();
        queue.set_fail_enqueue(true);

        let err = service(&store, &queue)
            .with_orphan_compensation(true)
            .submit(b"video".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, AdmissionError::Enqueue(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_file() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload");
        tokio::fs::write(&path, b"spooled").await.unwrap();

        let resp = service(&store, &queue).submit_file(&path, 7).await.unwrap();

        assert_eq!(store.get(&input_key(&resp.job_id)).unwrap(), b"spooled");
    }
}

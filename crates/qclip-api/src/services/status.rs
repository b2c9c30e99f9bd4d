//! Status resolution: a job's status is derived from its result artifact.

use std::sync::Arc;

use qclip_models::{JobId, JobStatusResponse};
use qclip_storage::{load_result, ArtifactStore, StorageResult};

/// Derives job status from the presence of `results/<jobId>.json`.
#[derive(Clone)]
pub struct StatusResolver {
    store: Arc<dyn ArtifactStore>,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// `completed` with the stored document when the result exists,
    /// `processing` otherwise. Pure read.
    pub async fn resolve(&self, job_id: &JobId) -> StorageResult<JobStatusResponse> {
        Ok(match load_result(self.store.as_ref(), job_id).await? {
            Some(result) => JobStatusResponse::completed(result),
            None => JobStatusResponse::processing(),
        })
    }
}

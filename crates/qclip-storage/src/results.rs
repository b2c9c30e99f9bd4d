//! Result document helpers.
//!
//! The worker publishes `results/<jobId>.json`; the status resolver reads it
//! back. Publishing overwrites, so duplicate deliveries converge.

use qclip_models::{result_key, JobId, JobResult};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::store::{ArtifactStore, CONTENT_TYPE_JSON};

/// Write the result document for `job_id`, replacing any previous one.
pub async fn publish_result(
    store: &dyn ArtifactStore,
    job_id: &JobId,
    result: &JobResult,
) -> StorageResult<String> {
    let key = result_key(job_id);
    let body = serde_json::to_vec_pretty(result)?;

    debug!(job_id = %job_id, key = %key, bytes = body.len(), "Publishing result");
    store.put_bytes(&key, body, CONTENT_TYPE_JSON).await?;

    Ok(key)
}

/// Load the result document for `job_id`.
///
/// Returns `Ok(None)` when no result exists yet. A stored document that is not
/// valid JSON is returned as `{"raw": "<text>"}`.
pub async fn load_result(store: &dyn ArtifactStore, job_id: &JobId) -> StorageResult<Option<Value>> {
    let key = result_key(job_id);

    let bytes = match store.get_bytes(&key).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Stored result is not valid JSON");
            let text = String::from_utf8_lossy(&bytes).into_owned();
            Ok(Some(json!({ "raw": text })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_absent_result_is_none() {
        let store = MemoryStore::new();
        assert!(load_result(&store, &JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_double_publish_is_idempotent() {
        let store = MemoryStore::new();
        let job_id = JobId::new();
        let result = JobResult::new("hello world").with_summary("greeting");

        publish_result(&store, &job_id, &result).await.unwrap();
        let first = store.get(&result_key(&job_id)).unwrap();
        publish_result(&store, &job_id, &result).await.unwrap();
        let second = store.get(&result_key(&job_id)).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.put_count(&result_key(&job_id)), 2);
        assert_eq!(store.len(), 1);

        let loaded = load_result(&store, &job_id).await.unwrap().unwrap();
        assert_eq!(loaded, serde_json::to_value(&result).unwrap());
    }

    #[tokio::test]
    async fn test_malformed_result_returns_raw() {
        let store = MemoryStore::new();
        let job_id = JobId::new();
        store.insert(result_key(&job_id), "{not json");

        let loaded = load_result(&store, &job_id).await.unwrap().unwrap();
        assert_eq!(loaded, json!({"raw": "{not json"}));
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let store = MemoryStore::new();
        store.fail_gets("results/");
        assert!(load_result(&store, &JobId::new()).await.is_err());
    }
}

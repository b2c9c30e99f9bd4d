//! Queryable transcript store.
//!
//! Secondary persistence of `{jobId -> transcription}`. Writes are upserts
//! keyed by job id, so duplicate deliveries converge on one document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use qclip_models::JobId;
use tracing::debug;

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::Value;

/// Default collection holding transcripts.
pub const TRANSCRIPTIONS_COLLECTION: &str = "transcriptions";

/// Upsert-only store of transcripts keyed by job id.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn upsert_transcription(&self, job_id: &JobId, transcription: &str) -> FirestoreResult<()>;
}

/// Firestore-backed transcript store.
#[derive(Clone)]
pub struct FirestoreTranscriptStore {
    client: FirestoreClient,
    collection: String,
}

impl FirestoreTranscriptStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            client,
            collection: TRANSCRIPTIONS_COLLECTION.to_string(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

#[async_trait]
impl TranscriptStore for FirestoreTranscriptStore {
    async fn upsert_transcription(&self, job_id: &JobId, transcription: &str) -> FirestoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert("jobId".to_string(), Value::string(job_id.as_str()));
        fields.insert("transcription".to_string(), Value::string(transcription));
        fields.insert("updatedAt".to_string(), Value::timestamp(Utc::now()));

        self.client
            .upsert_document(&self.collection, job_id.as_str(), fields)
            .await?;

        debug!(job_id = %job_id, collection = %self.collection, "Upserted transcription");
        Ok(())
    }
}

/// In-memory transcript store for tests.
#[derive(Clone, Default)]
pub struct MemoryTranscriptStore {
    rows: Arc<Mutex<HashMap<JobId, String>>>,
    writes: Arc<Mutex<usize>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent upserts fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }

    pub fn get(&self, job_id: &JobId) -> Option<String> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful upserts, including overwrites.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn upsert_transcription(&self, job_id: &JobId, transcription: &str) -> FirestoreResult<()> {
        if *self.failing.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(FirestoreError::from_http_status(503, "transcript store unavailable"));
        }
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.clone(), transcription.to_string());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

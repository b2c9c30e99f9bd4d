//! Firestore REST client.
//!
//! Only the document calls the transcript store needs: read one document and
//! upsert a set of fields. Retryable failures (network, 429, 5xx) are retried
//! with jittered backoff inside every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info_span, warn, Instrument};

use crate::config::{FirestoreConfig, RetryPolicy};
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::{record_request, record_retry};
use crate::types::{Document, Value};

/// OAuth scope for Firestore access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Bearer token the emulator accepts.
const EMULATOR_TOKEN: &str = "owner";

enum Auth {
    /// `gcp_auth` caches and refreshes tokens itself.
    ServiceAccount(Arc<dyn TokenProvider>),
    Emulator,
}

impl Auth {
    async fn bearer(&self) -> FirestoreResult<String> {
        match self {
            Auth::Emulator => Ok(EMULATOR_TOKEN.to_string()),
            Auth::ServiceAccount(provider) => provider
                .token(&[FIRESTORE_SCOPE])
                .await
                .map(|t| t.as_str().to_string())
                .map_err(|e| FirestoreError::auth(format!("failed to obtain token: {}", e))),
        }
    }
}

/// Firestore document client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    documents_url: String,
    retry: RetryPolicy,
    auth: Arc<Auth>,
}

impl FirestoreClient {
    pub fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let auth = match &config.emulator_host {
            Some(_) => Auth::Emulator,
            None => {
                let account = CustomServiceAccount::from_env()
                    .map_err(|e| FirestoreError::auth(format!("bad service account: {}", e)))?
                    .ok_or_else(|| {
                        FirestoreError::config("GOOGLE_APPLICATION_CREDENTIALS not set")
                    })?;
                Auth::ServiceAccount(Arc::new(account))
            }
        };

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("qclip-firestore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            documents_url: config.documents_url(),
            retry: config.retry,
            auth: Arc::new(auth),
        })
    }

    pub fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?)
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.documents_url, collection, doc_id)
    }

    /// Read a document. `None` when it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);
        self.execute("get_document", Method::GET, &url, &[], None)
            .await
    }

    /// Create the document or overwrite exactly the given fields.
    ///
    /// PATCH with an update mask of the field names, so other fields of an
    /// existing document are preserved.
    pub async fn upsert_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<()> {
        let url = self.document_url(collection, doc_id);
        let mut mask: Vec<(&str, String)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", k.clone()))
            .collect();
        mask.sort();
        let body = Document::new(fields);

        self.execute("upsert_document", Method::PATCH, &url, &mask, Some(&body))
            .await?;
        Ok(())
    }

    async fn execute(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Document>,
    ) -> FirestoreResult<Option<Document>> {
        let span = info_span!("firestore_request", operation, url = %url);
        async {
            let start = Instant::now();
            let mut retry = 0;
            let result = loop {
                match self.attempt(&method, url, query, body).await {
                    Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                        let delay = self.retry.delay(retry, e.retry_after());
                        warn!(
                            retry = retry + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Firestore request failed, retrying"
                        );
                        record_retry(operation);
                        tokio::time::sleep(delay).await;
                        retry += 1;
                    }
                    other => break other,
                }
            };

            let status = match &result {
                Ok(_) => "ok".to_string(),
                Err(e) => e.status_label(),
            };
            record_request(operation, &status, start.elapsed());
            debug!(status = %status, retries = retry, "Firestore request finished");
            result
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Document>,
    ) -> FirestoreResult<Option<Document>> {
        let token = self.auth.bearer().await?;
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND && *method == Method::GET {
            return Ok(None);
        }
        if status.is_success() {
            return Ok(Some(response.json().await?));
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();

        Err(
            match FirestoreError::from_http_status(status.as_u16(), format!("{} {}: {}", method, url, text)) {
                FirestoreError::RateLimited { .. } => FirestoreError::RateLimited { retry_after },
                other => other,
            },
        )
    }
}

//! Firestore client configuration.

use std::time::Duration;

use crate::error::{FirestoreError, FirestoreResult};

/// Backoff for retryable failures (network, 429, 5xx).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    ///
    /// A server hint wins; otherwise exponential growth capped at
    /// `max_delay`, jittered downwards but never below `base_delay`.
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let ceiling = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        ceiling.mul_f64(jitter_fraction()).max(self.base_delay)
    }
}

/// Pseudo-random fraction in [0, 1) from the clock's sub-second noise.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Where and how to reach Firestore.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Usually "(default)"
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    /// `host:port` of an emulator; disables OAuth when set
    pub emulator_host: Option<String>,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            emulator_host: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl FirestoreConfig {
    /// Create config from environment variables.
    ///
    /// Fails when no project id is configured, which the worker treats as
    /// "transcript persistence disabled".
    pub fn from_env() -> FirestoreResult<Self> {
        let defaults = Self::default();
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .ok()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                FirestoreError::config("GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set")
            })?;

        let retry = RetryPolicy {
            max_retries: env_parse("FIRESTORE_MAX_RETRIES").unwrap_or(defaults.retry.max_retries),
            base_delay: env_parse("FIRESTORE_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            max_delay: env_parse("FIRESTORE_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
        };

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID").unwrap_or(defaults.database_id),
            connect_timeout: env_parse("FIRESTORE_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            retry,
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
            ..defaults
        })
    }

    /// Base URL of the documents collection root.
    pub(crate) fn documents_url(&self) -> String {
        let origin = match &self.emulator_host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("http://{}", host),
            None => "https://firestore.googleapis.com".to_string(),
        };
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            origin, self.project_id, self.database_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_delay_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
        };
        for retry in 0..10 {
            let delay = policy.delay(retry, None);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn test_delay_prefers_server_hint() {
        let delay = RetryPolicy::default().delay(0, Some(Duration::from_secs(2)));
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn test_documents_url_for_emulator() {
        let config = FirestoreConfig {
            project_id: "demo".to_string(),
            emulator_host: Some("localhost:8080".to_string()),
            ..FirestoreConfig::default()
        };
        assert_eq!(
            config.documents_url(),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents"
        );
    }

    #[test]
    #[serial]
    fn test_from_env_requires_project() {
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        assert!(FirestoreConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_emulator_and_retry() {
        std::env::set_var("GCP_PROJECT_ID", "demo");
        std::env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");
        std::env::set_var("FIRESTORE_MAX_RETRIES", "7");

        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.project_id, "demo");
        assert_eq!(config.emulator_host.as_deref(), Some("localhost:8080"));
        assert_eq!(config.retry.max_retries, 7);

        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIRESTORE_EMULATOR_HOST");
        std::env::remove_var("FIRESTORE_MAX_RETRIES");
    }
}

//! Poller configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ClientError;

/// Which poll responses count toward the attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CeilingPolicy {
    /// Every tick counts; a job that stays `processing` eventually times out
    #[default]
    AllResponses,
    /// Only failed polls (transport, non-2xx, unparseable) can trip the ceiling
    ErrorsOnly,
}

impl FromStr for CeilingPolicy {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" | "all-responses" => Ok(CeilingPolicy::AllResponses),
            "errors-only" | "errors" => Ok(CeilingPolicy::ErrorsOnly),
            other => Err(ClientError::config(format!(
                "unknown ceiling policy '{}', expected 'all' or 'errors-only'",
                other
            ))),
        }
    }
}

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub base_url: String,
    pub poll_interval: Duration,
    /// Polls allowed before the session is failed with a timeout
    pub max_attempts: u32,
    pub ceiling: CeilingPolicy,
    /// Timeout of a single status request
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            poll_interval: Duration::from_millis(2000),
            max_attempts: 30,
            ceiling: CeilingPolicy::AllResponses,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl PollerConfig {
    /// How long a job can stay `processing` before the ceiling fails the
    /// session: `poll_interval * (max_attempts + 1)`, about 62s with the
    /// defaults. `None` under [`CeilingPolicy::ErrorsOnly`], where healthy
    /// polls never count.
    pub fn ceiling_budget(&self) -> Option<Duration> {
        match self.ceiling {
            CeilingPolicy::AllResponses => {
                Some(self.poll_interval * self.max_attempts.saturating_add(1))
            }
            CeilingPolicy::ErrorsOnly => None,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("QCLIP_API_URL").unwrap_or(defaults.base_url),
            poll_interval: std::env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_attempts: std::env::var("POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            ceiling: std::env::var("POLL_CEILING_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.ceiling),
            request_timeout: defaults.request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_ceiling_policy_parse() {
        assert_eq!("all".parse::<CeilingPolicy>().unwrap(), CeilingPolicy::AllResponses);
        assert_eq!(
            "errors-only".parse::<CeilingPolicy>().unwrap(),
            CeilingPolicy::ErrorsOnly
        );
        assert!("sometimes".parse::<CeilingPolicy>().is_err());
    }

    #[test]
    fn test_ceiling_budget() {
        let config = PollerConfig::default();
        assert_eq!(config.ceiling_budget(), Some(Duration::from_secs(62)));

        let patient = PollerConfig {
            max_attempts: 299,
            ..PollerConfig::default()
        };
        assert_eq!(patient.ceiling_budget(), Some(Duration::from_secs(600)));

        let errors_only = PollerConfig {
            ceiling: CeilingPolicy::ErrorsOnly,
            ..PollerConfig::default()
        };
        assert_eq!(errors_only.ceiling_budget(), None);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("POLL_INTERVAL_MS", "500");
        std::env::set_var("POLL_CEILING_POLICY", "errors-only");

        let config = PollerConfig::from_env();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.ceiling, CeilingPolicy::ErrorsOnly);
        assert_eq!(config.max_attempts, 30);

        std::env::remove_var("POLL_INTERVAL_MS");
        std::env::remove_var("POLL_CEILING_POLICY");
    }
}

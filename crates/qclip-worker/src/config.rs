//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent deliveries
    pub max_concurrent_jobs: usize,
    /// Upper bound on one delivery's pipeline run
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Parent of the per-delivery working directories
    pub work_dir: PathBuf,
    /// How long a receive call blocks waiting for work
    pub receive_wait: Duration,
    /// How often the worker should scan for orphaned deliveries
    pub claim_interval: Duration,
    /// Minimum idle time before an unsettled delivery can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Whether to run the summarization stage
    pub summary_enabled: bool,
    /// Explicit ffmpeg binary; `PATH` lookup when unset
    pub ffmpeg_path: Option<PathBuf>,
    pub ffmpeg_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: std::env::temp_dir().join("qclip"),
            receive_wait: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
            summary_enabled: true,
            ffmpeg_path: None,
            ffmpeg_timeout: Duration::from_secs(1800),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl WorkerConfig {
    /// How often an in-flight delivery's lease is renewed. A third of
    /// `claim_min_idle`, so a live job is never seen as idle by the claim scan.
    pub fn lease_renewal_interval(&self) -> Duration {
        (self.claim_min_idle / 3).max(Duration::from_millis(10))
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT", defaults.job_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            receive_wait: defaults.receive_wait,
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", defaults.claim_min_idle),
            summary_enabled: std::env::var("WORKER_SUMMARY_ENABLED")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(defaults.summary_enabled),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            ffmpeg_timeout: env_secs("WORKER_FFMPEG_TIMEOUT", defaults.ffmpeg_timeout),
        }
    }
}

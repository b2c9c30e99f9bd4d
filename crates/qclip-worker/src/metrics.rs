//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};
use crate::stage::Stage;

pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "qclip_worker_jobs_started_total";
    pub const JOBS_ACKED_TOTAL: &str = "qclip_worker_jobs_acked_total";
    pub const JOBS_ABANDONED_TOTAL: &str = "qclip_worker_jobs_abandoned_total";
    pub const JOBS_IN_FLIGHT: &str = "qclip_worker_jobs_in_flight";
    pub const JOB_DURATION_SECONDS: &str = "qclip_worker_job_duration_seconds";
    pub const STAGE_DURATION_SECONDS: &str = "qclip_worker_stage_duration_seconds";
    pub const STAGE_DEGRADED_TOTAL: &str = "qclip_worker_stage_degraded_total";
    pub const DELIVERIES_CLAIMED_TOTAL: &str = "qclip_worker_deliveries_claimed_total";
}

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to install metrics exporter: {}", e)))
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_acked(duration_secs: f64) {
    counter!(names::JOBS_ACKED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "acked").record(duration_secs);
}

pub fn record_job_abandoned(outcome: &'static str, duration_secs: f64) {
    counter!(names::JOBS_ABANDONED_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "abandoned").record(duration_secs);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_stage_duration(stage: Stage, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

pub fn record_stage_degraded(stage: Stage) {
    counter!(names::STAGE_DEGRADED_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_claimed(count: usize) {
    counter!(names::DELIVERIES_CLAIMED_TOTAL).increment(count as u64);
}

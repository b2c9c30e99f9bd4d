//! Firestore request metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub const REQUESTS_TOTAL: &str = "qclip_firestore_requests_total";
pub const RETRIES_TOTAL: &str = "qclip_firestore_retries_total";
pub const LATENCY_SECONDS: &str = "qclip_firestore_latency_seconds";

/// One finished call, retries included in `elapsed`.
pub fn record_request(operation: &'static str, status: &str, elapsed: Duration) {
    counter!(REQUESTS_TOTAL, "operation" => operation, "status" => status.to_string()).increment(1);
    histogram!(LATENCY_SECONDS, "operation" => operation).record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &'static str) {
    counter!(RETRIES_TOTAL, "operation" => operation).increment(1);
}

//! Structured job logging.

use qclip_models::JobId;
use tracing::{error, info, warn, Span};

use crate::stage::Stage;

/// Logger carrying a job id and operation on every event.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    delivery: u32,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            delivery: 1,
        }
    }

    /// Attach the delivery count of the message being handled.
    pub fn with_delivery(mut self, delivery: u32) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            delivery = self.delivery,
            "Job started: {}", message
        );
    }

    pub fn log_stage(&self, stage: Stage, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %stage,
            "{}", message
        );
    }

    /// Log a swallowed best-effort failure.
    pub fn log_degraded(&self, stage: Stage, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %stage,
            "Stage degraded: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            delivery = self.delivery,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            delivery = self.delivery,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span for instrumenting the whole pipeline run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation,
            delivery = self.delivery
        )
    }
}

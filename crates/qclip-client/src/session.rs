//! Client-local poll session.

use chrono::{DateTime, Utc};
use qclip_models::{JobId, JobStatus, PollStage};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::machine::{transition, PollEvent};
use crate::poller::POLL_TIMEOUT_MESSAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// State of one submit-and-poll session.
///
/// Owned by a [`Poller`](crate::Poller); replaced on reset, never reused.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSession {
    /// Bumped on every reset; stale poll tasks compare against it
    pub generation: u64,
    pub job_id: Option<JobId>,
    pub attempt_count: u32,
    pub last_status: Option<JobStatus>,
    pub stage: PollStage,
    /// Stage trace starting with `idle`: every stage change plus each
    /// `processing` report while already processing
    pub stages: Vec<PollStage>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub log: Vec<LogEntry>,
}

impl PollSession {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            job_id: None,
            attempt_count: 0,
            last_status: None,
            stage: PollStage::Idle,
            stages: vec![PollStage::Idle],
            result: None,
            error: None,
            log: Vec::new(),
        }
    }

    /// Session attached to an already admitted job, ready to poll.
    pub fn attached(generation: u64, job_id: JobId) -> Self {
        let mut session = Self::new(generation);
        session.job_id = Some(job_id);
        session.enter(PollStage::Queued);
        session
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn record(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        debug!(generation = self.generation, level = ?level, "{}", message);
        self.log.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    /// Feed `event` through the state machine.
    ///
    /// Illegal events are logged and ignored; returns whether the stage changed
    /// or self-looped legally.
    pub fn apply(&mut self, event: PollEvent) -> bool {
        let processing_report = event == PollEvent::PollProcessing;
        let Some(next) = transition(self.stage, &event) else {
            warn!(
                stage = %self.stage,
                event = event.name(),
                "Ignoring event not legal in current stage"
            );
            self.record(
                LogLevel::Warn,
                format!("Ignored {} while {}", event.name(), self.stage),
            );
            return false;
        };

        match event {
            PollEvent::Submit { has_file: false } => {
                self.error = Some("Please select a video file first.".to_string());
                self.record(LogLevel::Error, "No file selected");
            }
            PollEvent::SubmitRejected(message) => {
                self.record(LogLevel::Error, format!("Upload failed: {}", message));
                self.error = Some(message);
            }
            PollEvent::PollCompleted(result) => {
                self.result = result;
                self.record(LogLevel::Success, "Job completed successfully");
            }
            PollEvent::PollFailed(message) => {
                self.record(LogLevel::Error, format!("Job failed: {}", message));
                self.error = Some(message);
            }
            PollEvent::MaxAttemptsExceeded => {
                self.error = Some(POLL_TIMEOUT_MESSAGE.to_string());
            }
            _ => {}
        }

        if next != self.stage || processing_report {
            self.enter(next);
        }
        true
    }

    fn enter(&mut self, stage: PollStage) {
        self.stage = stage;
        self.stages.push(stage);
    }
}

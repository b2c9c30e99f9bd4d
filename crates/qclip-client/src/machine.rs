//! Poll stage state machine.
//!
//! ```text
//! idle --submit(file)--> preparing --persisted--> uploaded --queue ack--> queued
//! queued/processing --processing--> processing
//! queued/processing --completed--> completed
//! queued/processing --failed | max attempts--> failed
//! preparing --rejected--> failed
//! any --reset--> idle
//! ```

use qclip_models::PollStage;
use serde_json::Value;

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// User submitted; `has_file` is false when nothing was selected
    Submit { has_file: bool },
    ArtifactPersisted,
    QueueAcknowledged,
    SubmitRejected(String),
    PollQueued,
    PollProcessing,
    PollCompleted(Option<Value>),
    PollFailed(String),
    MaxAttemptsExceeded,
    Reset,
}

impl PollEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PollEvent::Submit { .. } => "submit",
            PollEvent::ArtifactPersisted => "artifact_persisted",
            PollEvent::QueueAcknowledged => "queue_acknowledged",
            PollEvent::SubmitRejected(_) => "submit_rejected",
            PollEvent::PollQueued => "poll_queued",
            PollEvent::PollProcessing => "poll_processing",
            PollEvent::PollCompleted(_) => "poll_completed",
            PollEvent::PollFailed(_) => "poll_failed",
            PollEvent::MaxAttemptsExceeded => "max_attempts_exceeded",
            PollEvent::Reset => "reset",
        }
    }
}

/// Next stage for `event` in `from`, or `None` if the event is not legal there.
pub fn transition(from: PollStage, event: &PollEvent) -> Option<PollStage> {
    use PollStage::*;

    match (from, event) {
        (_, PollEvent::Reset) => Some(Idle),

        (Idle, PollEvent::Submit { has_file: true }) => Some(Preparing),
        (Idle, PollEvent::Submit { has_file: false }) => Some(Idle),

        (Preparing, PollEvent::ArtifactPersisted) => Some(Uploaded),
        (Preparing, PollEvent::SubmitRejected(_)) => Some(Failed),
        (Uploaded, PollEvent::QueueAcknowledged) => Some(Queued),

        // A late "queued" report never moves a job backwards
        (Queued, PollEvent::PollQueued) => Some(Queued),
        (Processing, PollEvent::PollQueued) => Some(Processing),
        (Queued | Processing, PollEvent::PollProcessing) => Some(Processing),
        (Queued | Processing, PollEvent::PollCompleted(_)) => Some(Completed),
        (Queued | Processing, PollEvent::PollFailed(_)) => Some(Failed),
        (Queued | Processing, PollEvent::MaxAttemptsExceeded) => Some(Failed),

        _ => None,
    }
}

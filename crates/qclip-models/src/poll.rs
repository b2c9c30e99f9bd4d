//! Client-side stages of a job as seen by a polling session.

use serde::{Deserialize, Serialize};

/// Stage of a client poll session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollStage {
    #[default]
    Idle,
    Preparing,
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl PollStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStage::Idle => "idle",
            PollStage::Preparing => "preparing",
            PollStage::Uploaded => "uploaded",
            PollStage::Queued => "queued",
            PollStage::Processing => "processing",
            PollStage::Completed => "completed",
            PollStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollStage::Completed | PollStage::Failed)
    }

    /// Stages during which the poll loop should be running.
    pub fn is_polling(&self) -> bool {
        matches!(self, PollStage::Queued | PollStage::Processing)
    }
}

impl std::fmt::Display for PollStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

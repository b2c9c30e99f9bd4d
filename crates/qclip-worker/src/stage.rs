//! Pipeline stages and their failure classification.

use std::fmt;

/// How a stage failure affects the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageClass {
    /// Failure abandons the delivery
    Required,
    /// Failure is recorded and the job proceeds
    BestEffort,
    /// Runs whatever the outcome; failure is logged only
    Always,
}

/// A step of the per-delivery pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Transform,
    PrimaryAnalysis,
    SecondaryAnalysis,
    Publish,
    SecondaryPersistence,
    Cleanup,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Fetch,
        Stage::Transform,
        Stage::PrimaryAnalysis,
        Stage::SecondaryAnalysis,
        Stage::Publish,
        Stage::SecondaryPersistence,
        Stage::Cleanup,
    ];

    pub fn class(&self) -> StageClass {
        match self {
            Stage::Fetch | Stage::Transform | Stage::PrimaryAnalysis | Stage::Publish => {
                StageClass::Required
            }
            Stage::SecondaryAnalysis | Stage::SecondaryPersistence => StageClass::BestEffort,
            Stage::Cleanup => StageClass::Always,
        }
    }

    pub fn is_required(&self) -> bool {
        self.class() == StageClass::Required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::PrimaryAnalysis => "primary_analysis",
            Stage::SecondaryAnalysis => "secondary_analysis",
            Stage::Publish => "publish",
            Stage::SecondaryPersistence => "secondary_persistence",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A swallowed failure of a best-effort or cleanup stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

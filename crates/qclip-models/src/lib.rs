//! Shared data models for the QuickClip job pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity and the queued job descriptor
//! - The published result document
//! - Status responses returned to polling clients
//! - Client-side poll stages

pub mod job;
pub mod poll;
pub mod result;
pub mod status;

pub use job::{input_key, result_key, JobDescriptor, JobId, JobIdError};
pub use poll::PollStage;
pub use result::JobResult;
pub use status::{JobStatus, JobStatusResponse, SubmitResponse};

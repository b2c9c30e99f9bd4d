//! Transcription worker.
//!
//! This crate provides:
//! - The staged job pipeline (fetch, transform, analyze, publish, persist, cleanup)
//! - Job executor with bounded concurrency, stale-delivery claiming and graceful shutdown
//! - Structured job logging and worker metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod stage;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{DeliveryOutcome, JobExecutor};
pub use logging::JobLogger;
pub use pipeline::{Pipeline, PipelineReport, EMPTY_TRANSCRIPT_SUMMARY};
pub use stage::{Stage, StageClass, StageFailure};

//! Client for the QuickClip job API.
//!
//! This crate provides:
//! - [`JobsApi`] with a reqwest implementation for `/upload` and `/jobs/:id`
//! - The poll stage state machine and the owned [`PollSession`]
//! - [`Poller`], a cancellable fixed-interval poll loop with an attempt ceiling

pub mod api;
pub mod config;
pub mod error;
pub mod machine;
pub mod poller;
pub mod session;

pub use api::{HttpJobsApi, JobsApi};
pub use config::{CeilingPolicy, PollerConfig};
pub use error::{ClientError, ClientResult};
pub use machine::{transition, PollEvent};
pub use poller::{Poller, POLL_TIMEOUT_MESSAGE};
pub use session::{LogEntry, LogLevel, PollSession};

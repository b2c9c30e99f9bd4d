//! Artifact storage for the job pipeline.
//!
//! This crate provides:
//! - The [`ArtifactStore`] trait used by admission, the worker and the status resolver
//! - An S3-compatible client (Cloudflare R2, MinIO, AWS S3)
//! - An in-memory store for tests
//! - Result document publish/load helpers

pub mod client;
pub mod error;
pub mod memory;
pub mod results;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use results::{load_result, publish_result};
pub use store::{ArtifactStore, CONTENT_TYPE_JSON, CONTENT_TYPE_OCTET};

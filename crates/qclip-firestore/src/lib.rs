//! Firestore persistence for transcripts.
//!
//! A minimal REST client (service account or emulator auth, retry with
//! jittered backoff) and the [`TranscriptStore`] the worker uses for
//! best-effort secondary persistence.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod transcripts;
pub mod types;


pub use client::FirestoreClient;
pub use config::{FirestoreConfig, RetryPolicy};
pub use error::{FirestoreError, FirestoreResult};
pub use transcripts::{FirestoreTranscriptStore, MemoryTranscriptStore, TranscriptStore};
pub use types::{Document, Value};

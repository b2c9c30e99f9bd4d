//! Business logic services.

pub mod admission;
pub mod status;

pub use admission::{AdmissionError, AdmissionService};
pub use status::StatusResolver;

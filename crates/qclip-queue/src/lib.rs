//! At-least-once delivery queue for job descriptors.
//!
//! This crate provides:
//! - The [`DeliveryQueue`] trait with explicit ack/abandon
//! - A Redis Streams implementation with consumer groups and a dead letter stream
//! - An in-memory implementation with the same redelivery semantics

pub mod delivery;
pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_stream;

pub use delivery::{AbandonOutcome, Delivery};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use queue::{DeliveryQueue, QueueConfig};
pub use redis_stream::RedisStreamQueue;

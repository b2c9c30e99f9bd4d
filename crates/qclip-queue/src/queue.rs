//! Queue abstraction and configuration.

use std::time::Duration;

use async_trait::async_trait;
use qclip_models::JobDescriptor;

use crate::delivery::{AbandonOutcome, Delivery};
use crate::error::QueueResult;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Deliveries allowed before an abandoned message is dead-lettered
    pub max_deliveries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "qclip:jobs".to_string(),
            consumer_group: "qclip:workers".to_string(),
            dlq_stream_name: "qclip:dlq".to_string(),
            max_deliveries: 5,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_deliveries),
        }
    }
}

/// Durable at-least-once channel with explicit per-delivery settlement.
///
/// Every received delivery must be settled with [`ack`](Self::ack) or
/// [`abandon`](Self::abandon). Unsettled deliveries become visible again
/// through [`claim_stale`](Self::claim_stale).
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Enqueue a descriptor. Returns the backend message id.
    async fn enqueue(&self, descriptor: &JobDescriptor) -> QueueResult<String>;

    /// Receive up to `max` deliveries, waiting at most `wait` for the first.
    async fn receive(&self, consumer: &str, max: usize, wait: Duration)
        -> QueueResult<Vec<Delivery>>;

    /// Settle a delivery as done. It will not be delivered again.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Settle a delivery as failed so it is redelivered, or dead-lettered once
    /// its redelivery budget is spent.
    async fn abandon(&self, delivery: &Delivery, reason: &str) -> QueueResult<AbandonOutcome>;

    /// Reset the idle time of a delivery `consumer` is still working on, so
    /// [`claim_stale`](Self::claim_stale) does not hand it out again.
    async fn renew(&self, _consumer: &str, _delivery: &Delivery) -> QueueResult<()> {
        Ok(())
    }

    /// Take over deliveries left unsettled by another consumer for at least `min_idle`.
    async fn claim_stale(
        &self,
        _consumer: &str,
        _min_idle: Duration,
        _max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        Ok(Vec::new())
    }
}

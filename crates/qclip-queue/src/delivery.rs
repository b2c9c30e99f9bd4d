//! A single delivery of a job descriptor.

use qclip_models::JobDescriptor;

/// One delivery of a queued descriptor to a consumer.
///
/// The same descriptor may arrive in several deliveries; `delivery_count`
/// starts at 1 and grows on every redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend-specific message handle used for ack/abandon
    pub message_id: String,
    pub descriptor: JobDescriptor,
    pub delivery_count: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// What the queue did with an abandoned delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonOutcome {
    /// Made visible again for another delivery
    Requeued,
    /// Redelivery budget exhausted; moved to the dead letter stream
    DeadLettered,
}

impl AbandonOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbandonOutcome::Requeued => "requeued",
            AbandonOutcome::DeadLettered => "dead_lettered",
        }
    }
}

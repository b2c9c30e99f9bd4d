//! In-memory delivery queue.
//!
//! Same settlement semantics as the Redis implementation: abandon requeues
//! with an incremented delivery count until `max_deliveries`, then dead-letters.
//! Used by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use qclip_models::JobDescriptor;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::delivery::{AbandonOutcome, Delivery};
use crate::error::{QueueError, QueueResult};
use crate::queue::DeliveryQueue;

struct Message {
    descriptor: JobDescriptor,
    attempt: u32,
}

struct InFlight {
    message: Message,
    consumer: String,
    since: Instant,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    ready: VecDeque<(String, Message)>,
    in_flight: HashMap<String, InFlight>,
    dead_letters: Vec<(JobDescriptor, String)>,
    enqueued: Vec<JobDescriptor>,
    acked: Vec<JobDescriptor>,
    fail_enqueue: bool,
}

/// Thread-safe in-memory [`DeliveryQueue`]. Clones share state.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    max_deliveries: u32,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

impl MemoryQueue {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
            max_deliveries: max_deliveries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make subsequent enqueues fail (or succeed again).
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.lock().fail_enqueue = fail;
    }

    /// Every descriptor ever accepted by `enqueue`, in order.
    pub fn enqueued(&self) -> Vec<JobDescriptor> {
        self.lock().enqueued.clone()
    }

    /// Descriptors whose deliveries were acked, in order.
    pub fn acked(&self) -> Vec<JobDescriptor> {
        self.lock().acked.clone()
    }

    /// Dead-lettered descriptors with the final abandon reason.
    pub fn dead_letters(&self) -> Vec<(JobDescriptor, String)> {
        self.lock().dead_letters.clone()
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Deliveries received but not yet settled.
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn push_ready(&self, inner: &mut Inner, message: Message) -> String {
        inner.next_id += 1;
        let id = format!("mem-{}", inner.next_id);
        inner.ready.push_back((id.clone(), message));
        id
    }

    fn take_ready(&self, consumer: &str, max: usize) -> Vec<Delivery> {
        let mut inner = self.lock();
        let mut out = Vec::new();
        while out.len() < max {
            let Some((id, message)) = inner.ready.pop_front() else {
                break;
            };
            out.push(Delivery {
                message_id: id.clone(),
                descriptor: message.descriptor.clone(),
                delivery_count: message.attempt,
            });
            inner.in_flight.insert(
                id,
                InFlight {
                    message,
                    consumer: consumer.to_string(),
                    since: Instant::now(),
                },
            );
        }
        out
    }
}

#[async_trait]
impl DeliveryQueue for MemoryQueue {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> QueueResult<String> {
        let id = {
            let mut inner = self.lock();
            if inner.fail_enqueue {
                return Err(QueueError::enqueue_failed("injected enqueue failure"));
            }
            inner.enqueued.push(descriptor.clone());
            self.push_ready(
                &mut inner,
                Message {
                    descriptor: descriptor.clone(),
                    attempt: 1,
                },
            )
        };
        self.notify.notify_one();
        debug!(job_id = %descriptor.job_id, message_id = %id, "Enqueued job");
        Ok(id)
    }

    async fn receive(
        &self,
        consumer: &str,
        max: usize,
        wait: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        let max = max.max(1);
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            let batch = self.take_ready(consumer, max);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut inner = self.lock();
        let flight = inner
            .in_flight
            .remove(&delivery.message_id)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.message_id.clone()))?;
        inner.acked.push(flight.message.descriptor);
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery, reason: &str) -> QueueResult<AbandonOutcome> {
        let outcome = {
            let mut inner = self.lock();
            let flight = inner
                .in_flight
                .remove(&delivery.message_id)
                .ok_or_else(|| QueueError::UnknownDelivery(delivery.message_id.clone()))?;

            if delivery.delivery_count >= self.max_deliveries {
                warn!(job_id = %delivery.descriptor.job_id, reason = %reason, "Dead-lettering job");
                inner
                    .dead_letters
                    .push((flight.message.descriptor, reason.to_string()));
                AbandonOutcome::DeadLettered
            } else {
                self.push_ready(
                    &mut inner,
                    Message {
                        descriptor: flight.message.descriptor,
                        attempt: delivery.delivery_count + 1,
                    },
                );
                AbandonOutcome::Requeued
            }
        };

        if outcome == AbandonOutcome::Requeued {
            self.notify.notify_one();
        }
        Ok(outcome)
    }

    async fn renew(&self, consumer: &str, delivery: &Delivery) -> QueueResult<()> {
        let mut inner = self.lock();
        if let Some(flight) = inner.in_flight.get_mut(&delivery.message_id) {
            // A delivery already claimed by someone else stays theirs
            if flight.consumer == consumer {
                flight.since = Instant::now();
            }
        }
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut inner = self.lock();
        let now = Instant::now();
        let mut out = Vec::new();

        for (id, flight) in inner.in_flight.iter_mut() {
            if out.len() >= max.max(1) {
                break;
            }
            if now.duration_since(flight.since) >= min_idle {
                debug!(message_id = %id, from = %flight.consumer, to = %consumer, "Claimed stale delivery");
                flight.message.attempt += 1;
                flight.consumer = consumer.to_string();
                flight.since = now;
                out.push(Delivery {
                    message_id: id.clone(),
                    descriptor: flight.message.descriptor.clone(),
                    delivery_count: flight.message.attempt,
                });
            }
        }

        Ok(out)
    }
}

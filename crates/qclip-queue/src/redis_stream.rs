//! Delivery queue on Redis Streams.
//!
//! Each message is a stream entry with fields `job` (descriptor JSON) and
//! `attempt` (1-based enqueue generation). Abandon re-adds the payload with
//! `attempt + 1` and deletes the original; ack deletes it outright.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qclip_models::JobDescriptor;
use redis::streams::{StreamClaimReply, StreamPendingCountReply, StreamReadReply};
use redis::{AsyncCommands, Value};
use tracing::{debug, info, warn};

use crate::delivery::{AbandonOutcome, Delivery};
use crate::error::{QueueError, QueueResult};
use crate::queue::{DeliveryQueue, QueueConfig};

const FIELD_JOB: &str = "job";
const FIELD_ATTEMPT: &str = "attempt";

/// Redis Streams delivery queue using a consumer group.
pub struct RedisStreamQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisStreamQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Ping Redis.
    pub async fn check_connectivity(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Number of entries in the job stream (pending and unread).
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Number of entries in the dead letter stream.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    async fn add_entry(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        payload: &str,
        attempt: u32,
    ) -> QueueResult<String> {
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(FIELD_JOB)
            .arg(payload)
            .arg(FIELD_ATTEMPT)
            .arg(attempt)
            .query_async(conn)
            .await?;
        Ok(message_id)
    }

    async fn settle(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        message_id: &str,
    ) -> QueueResult<()> {
        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;

        Ok(())
    }

    async fn dead_letter(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        message_id: &str,
        payload: &str,
        reason: &str,
    ) -> QueueResult<()> {
        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg(FIELD_JOB)
            .arg(payload)
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;

        self.settle(conn, message_id).await?;
        metrics::counter!("qclip_queue_dead_lettered_total").increment(1);
        Ok(())
    }

    /// Turn raw stream entries into deliveries. Entries that cannot be parsed
    /// are dead-lettered immediately. `extra_deliveries` maps message ids to
    /// how many times the group already delivered them.
    async fn parse_entries(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        entries: Vec<redis::streams::StreamId>,
        extra_deliveries: &HashMap<String, u32>,
    ) -> QueueResult<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(entries.len());

        for entry in entries {
            let message_id = entry.id.clone();
            let payload = field_string(&entry.map, FIELD_JOB).unwrap_or_default();
            let attempt = field_string(&entry.map, FIELD_ATTEMPT)
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(1);

            match serde_json::from_str::<JobDescriptor>(&payload) {
                Ok(descriptor) => {
                    let previous = extra_deliveries.get(&message_id).copied().unwrap_or(0);
                    deliveries.push(Delivery {
                        message_id,
                        descriptor,
                        delivery_count: attempt + previous,
                    });
                }
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "Malformed job payload, dead-lettering");
                    self.dead_letter(conn, &message_id, &payload, &format!("malformed payload: {}", e))
                        .await?;
                }
            }
        }

        Ok(deliveries)
    }
}

fn field_string(map: &HashMap<String, Value>, field: &str) -> Option<String> {
    match map.get(field) {
        Some(Value::BulkString(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Some(Value::SimpleString(s)) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl DeliveryQueue for RedisStreamQueue {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(descriptor)?;

        let message_id = self
            .add_entry(&mut conn, &payload, 1)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(
            job_id = %descriptor.job_id,
            message_id = %message_id,
            "Enqueued job"
        );
        Ok(message_id)
    }

    async fn receive(
        &self,
        consumer: &str,
        max: usize,
        wait: Duration,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max.max(1))
            .arg("BLOCK")
            .arg(wait.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect::<Vec<_>>())
            .unwrap_or_default();

        let deliveries = self.parse_entries(&mut conn, entries, &HashMap::new()).await?;
        for d in &deliveries {
            debug!(job_id = %d.descriptor.job_id, delivery = d.delivery_count, "Received delivery");
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.settle(&mut conn, &delivery.message_id).await?;
        debug!(message_id = %delivery.message_id, "Acknowledged delivery");
        Ok(())
    }

    async fn abandon(&self, delivery: &Delivery, reason: &str) -> QueueResult<AbandonOutcome> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&delivery.descriptor)?;

        if delivery.delivery_count >= self.config.max_deliveries {
            self.dead_letter(&mut conn, &delivery.message_id, &payload, reason)
                .await?;
            warn!(
                job_id = %delivery.descriptor.job_id,
                deliveries = delivery.delivery_count,
                reason = %reason,
                "Moved job to dead letter stream"
            );
            return Ok(AbandonOutcome::DeadLettered);
        }

        // Re-add before settling so a crash in between duplicates rather than loses.
        let new_id = self
            .add_entry(&mut conn, &payload, delivery.delivery_count + 1)
            .await?;
        self.settle(&mut conn, &delivery.message_id).await?;

        debug!(
            job_id = %delivery.descriptor.job_id,
            old_id = %delivery.message_id,
            new_id = %new_id,
            "Requeued abandoned delivery"
        );
        Ok(AbandonOutcome::Requeued)
    }

    async fn renew(&self, consumer: &str, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // JUSTID resets the idle time without bumping the delivery counter
        let _: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(0)
            .arg(&delivery.message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max.max(1))
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let previous: HashMap<String, u32> = pending
            .ids
            .iter()
            .map(|p| (p.id.clone(), p.times_delivered as u32))
            .collect();

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for p in &pending.ids {
            cmd.arg(&p.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let deliveries = self.parse_entries(&mut conn, claimed.ids, &previous).await?;
        for d in &deliveries {
            info!(
                job_id = %d.descriptor.job_id,
                delivery = d.delivery_count,
                "Claimed stale delivery"
            );
        }
        Ok(deliveries)
    }
}

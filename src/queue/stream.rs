//! Reliable delivery over a Redis stream consumer group.
//!
//! Each dequeue claims exactly one entry for this group/consumer identity
//! and does not acknowledge it; `XACK` happens only after the task's full
//! lifecycle has completed. A crash mid-task leaves the entry claimed but
//! unacked, redeliverable to another consumer.

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio::sync::Mutex;

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::protocol::TaskRequest;
use crate::queue::{Delivery, DeliveryChannel, DeliveryHandle, PAYLOAD_FIELD, parse_task};

/// Reliable task queue backed by a Redis stream.
pub struct StreamQueue {
    key: String,
    group: String,
    consumer: String,
    /// Dedicated connection for the indefinitely-blocking read. Kept separate
    /// so acks and enqueues are never queued behind it.
    blocking: Mutex<MultiplexedConnection>,
    side: Mutex<MultiplexedConnection>,
}

impl StreamQueue {
    /// Connect to Redis. Connection failure here is a startup error and is
    /// propagated to the caller.
    pub async fn connect(config: &WorkerConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let blocking = client.get_multiplexed_async_connection().await?;
        let side = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            key: config.queue_key.clone(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            blocking: Mutex::new(blocking),
            side: Mutex::new(side),
        })
    }

    async fn ack_entry(&self, entry_id: &str) -> Result<(), QueueError> {
        let mut conn = self.side.lock().await;
        let _: i64 = conn.xack(&self.key, &self.group, &[entry_id]).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeliveryChannel for StreamQueue {
    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.side.lock().await;
        // Anchor at "$": the group sees only messages added after creation.
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.key)
            .arg(&self.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match created {
            Ok(()) => {
                tracing::info!(stream = %self.key, group = %self.group, "Consumer group created");
                Ok(())
            }
            // BUSYGROUP means the group already exists, which is the expected
            // outcome on every start after the first.
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(stream = %self.key, group = %self.group, "Consumer group exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        let mut conn = self.blocking.lock().await;
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(0);

        loop {
            let reply: StreamReadReply = conn
                .xread_options(&[&self.key], &[">"], &options)
                .await?;

            let Some(entry) = reply.keys.into_iter().flat_map(|k| k.ids).next() else {
                continue;
            };

            let Some(value) = entry.map.get(PAYLOAD_FIELD) else {
                // No payload field at all: this entry can never become a valid
                // task, so ack it now and move on.
                tracing::warn!(entry = %entry.id, "Stream entry has no payload field, discarding");
                self.ack_entry(&entry.id).await?;
                continue;
            };

            let raw: String = match redis::from_redis_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(entry = %entry.id, error = %e, "Stream payload is not a string, discarding");
                    self.ack_entry(&entry.id).await?;
                    continue;
                }
            };

            match parse_task(&raw) {
                Some(task) => {
                    return Ok(Delivery {
                        task,
                        handle: DeliveryHandle::entry(entry.id),
                    });
                }
                None => {
                    // Left unacked on purpose: parse failures are skipped, not
                    // silently consumed, and stay visible in the pending list.
                    tracing::debug!(entry = %entry.id, "Unparseable entry left unacknowledged");
                }
            }
        }
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<(), QueueError> {
        match handle.entry_id() {
            Some(entry_id) => self.ack_entry(entry_id).await,
            None => Ok(()),
        }
    }

    async fn enqueue(&self, task: &TaskRequest) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.side.lock().await;
        let _: String = conn
            .xadd(&self.key, "*", &[(PAYLOAD_FIELD, payload.as_str())])
            .await?;
        Ok(())
    }
}

//! Best-effort delivery over a Redis list.
//!
//! `BLPOP` removes the element before the task runs, so a crash mid-task
//! loses the message. That is the documented trade-off of this mode; the
//! reliable variant lives in [`super::stream`].

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::protocol::TaskRequest;
use crate::queue::{Delivery, DeliveryChannel, DeliveryHandle, parse_task};

/// Best-effort task queue backed by a Redis list.
pub struct ListQueue {
    key: String,
    /// Dedicated connection for the indefinitely-blocking pop. Kept separate
    /// so enqueues from the control path are never queued behind it.
    blocking: Mutex<MultiplexedConnection>,
    side: Mutex<MultiplexedConnection>,
}

impl ListQueue {
    /// Connect to Redis. Connection failure here is a startup error and is
    /// propagated to the caller.
    pub async fn connect(config: &WorkerConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let blocking = client.get_multiplexed_async_connection().await?;
        let side = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            key: config.queue_key.clone(),
            blocking: Mutex::new(blocking),
            side: Mutex::new(side),
        })
    }
}

#[async_trait::async_trait]
impl DeliveryChannel for ListQueue {
    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        let mut conn = self.blocking.lock().await;
        loop {
            // Timeout 0 blocks until an element arrives.
            let popped: Option<(String, String)> = conn.blpop(&self.key, 0.0).await?;
            let Some((_, raw)) = popped else {
                continue;
            };

            if let Some(task) = parse_task(&raw) {
                return Ok(Delivery {
                    task,
                    handle: DeliveryHandle::none(),
                });
            }
        }
    }

    async fn acknowledge(&self, _handle: &DeliveryHandle) -> Result<(), QueueError> {
        // Best-effort mode has nothing to acknowledge.
        Ok(())
    }

    async fn enqueue(&self, task: &TaskRequest) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.side.lock().await;
        let _: i64 = conn.rpush(&self.key, payload).await?;
        Ok(())
    }
}

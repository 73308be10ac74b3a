//! Result publisher — streams progress and terminal results out.

use std::sync::Arc;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

use crate::config::WorkerConfig;
use crate::error::PublishError;
use crate::protocol::OutputRecord;

/// Append-only sink for output records.
#[async_trait::async_trait]
pub trait OutputSink: Send + Sync {
    async fn publish(&self, record: &OutputRecord) -> Result<(), PublishError>;
}

/// Output sink backed by a Redis list.
pub struct RedisOutput {
    key: String,
    conn: Mutex<MultiplexedConnection>,
}

impl RedisOutput {
    /// Connect to Redis. Connection failure here is a startup error and is
    /// propagated to the caller.
    pub async fn connect(config: &WorkerConfig) -> Result<Self, PublishError> {
        let client =
            redis::Client::open(config.redis_url.as_str()).map_err(PublishError::from)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(PublishError::from)?;
        Ok(Self {
            key: config.output_key.clone(),
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait::async_trait]
impl OutputSink for RedisOutput {
    async fn publish(&self, record: &OutputRecord) -> Result<(), PublishError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.lock().await;
        let _: i64 = conn.rpush(&self.key, payload).await?;
        Ok(())
    }
}

/// Fire-and-forget publisher over an [`OutputSink`].
///
/// Failures are logged and dropped, never retried: the at-least-once
/// guarantee applies to task consumption, not to progress emission. A lost
/// progress event does not abort the task.
#[derive(Clone)]
pub struct ResultPublisher {
    sink: Arc<dyn OutputSink>,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }

    /// Publish a progress event immediately.
    pub async fn progress(&self, record: OutputRecord) {
        if let Err(e) = self.sink.publish(&record).await {
            tracing::warn!(error = %e, "Failed to publish progress event");
        }
    }

    /// Publish the terminal result for a task.
    pub async fn result(&self, record: OutputRecord) {
        if let Err(e) = self.sink.publish(&record).await {
            tracing::error!(error = %e, "Failed to publish task result");
        }
    }
}

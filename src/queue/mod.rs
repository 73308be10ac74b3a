//! Delivery channel abstraction over the task queue.
//!
//! Two implementations share one interface, selected by configuration:
//! [`list::ListQueue`] for best-effort delivery and [`stream::StreamQueue`]
//! for reliable consumer-group delivery. Call sites never branch on the mode;
//! acknowledgment is simply a no-op in best-effort mode.

pub mod list;
pub mod stream;

pub use list::ListQueue;
pub use stream::StreamQueue;

use crate::error::QueueError;
use crate::protocol::TaskRequest;

/// Name of the stream record field carrying the task payload (reliable mode).
pub const PAYLOAD_FIELD: &str = "payload";

/// Opaque token identifying one claimed delivery.
///
/// Must be presented back to [`DeliveryChannel::acknowledge`] once the full
/// task lifecycle has completed. Best-effort deliveries carry no token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    entry_id: Option<String>,
}

impl DeliveryHandle {
    /// Handle for a best-effort delivery (acknowledgment is a no-op).
    pub fn none() -> Self {
        Self { entry_id: None }
    }

    /// Handle for a claimed stream entry.
    pub fn entry(id: impl Into<String>) -> Self {
        Self {
            entry_id: Some(id.into()),
        }
    }

    pub fn entry_id(&self) -> Option<&str> {
        self.entry_id.as_deref()
    }
}

/// One dequeued task together with its delivery handle.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub task: TaskRequest,
    pub handle: DeliveryHandle,
}

/// A durable, ordered task queue.
///
/// `dequeue` suspends until a parseable task is available; unparseable
/// payloads are logged and skipped inside the implementation, so the consume
/// loop only ever sees well-formed tasks. The wait is ended only by process
/// shutdown, never by control signals.
#[async_trait::async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Idempotently create the consumer group, anchored at new messages only.
    /// A "group already exists" outcome is benign. No-op in best-effort mode.
    async fn ensure_group(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// Claim the next task. Blocks until one is available.
    async fn dequeue(&self) -> Result<Delivery, QueueError>;

    /// Acknowledge a completed delivery. Must be called only after the
    /// terminal result for the task has been published.
    async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<(), QueueError>;

    /// Append a task to the queue (used to synthesize the reset greeting).
    async fn enqueue(&self, task: &TaskRequest) -> Result<(), QueueError>;
}

/// Parse a raw queue payload into a task, logging and discarding failures.
/// Both backends skip-and-continue on `None`; they never crash the loop.
pub(crate) fn parse_task(raw: &str) -> Option<TaskRequest> {
    match serde_json::from_str(raw) {
        Ok(task) => Some(task),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable task payload");
            None
        }
    }
}

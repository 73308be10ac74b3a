//! Worker consume loop — strictly one task at a time.
//!
//! Dequeue, mark current, execute, publish the terminal result, clear the
//! slot, acknowledge. The next dequeue does not start until the previous
//! task's full terminal path (including acknowledgment) has completed, which
//! keeps control signals unambiguous: exactly one task can ever be current.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{DeliveryMode, WorkerConfig};
use crate::control::{self, ControlRouter};
use crate::coordinator::TaskCoordinator;
use crate::error::{QueueError, Result};
use crate::publish::{RedisOutput, ResultPublisher};
use crate::queue::{Delivery, DeliveryChannel, ListQueue, StreamQueue};
use crate::runtime::AgentRuntime;
use crate::slot::{ActiveTask, CurrentTaskSlot};

/// Backoff after a transient queue fault before re-entering the loop.
const DEQUEUE_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// The long-running queue consumer.
pub struct Worker {
    queue: Arc<dyn DeliveryChannel>,
    runtime: Arc<dyn AgentRuntime>,
    coordinator: TaskCoordinator,
    publisher: ResultPublisher,
    slot: Arc<CurrentTaskSlot>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn DeliveryChannel>,
        runtime: Arc<dyn AgentRuntime>,
        publisher: ResultPublisher,
        slot: Arc<CurrentTaskSlot>,
    ) -> Self {
        let coordinator = TaskCoordinator::new(runtime.clone(), publisher.clone());
        Self {
            queue,
            runtime,
            coordinator,
            publisher,
            slot,
        }
    }

    /// Run the consume loop until the queue closes.
    ///
    /// Consumer-group setup failure is a startup error and propagates;
    /// everything after that is retried or logged, never fatal.
    pub async fn run(&self) -> Result<()> {
        self.queue.ensure_group().await?;
        tracing::info!("Worker consuming tasks");

        loop {
            let delivery = match self.queue.dequeue().await {
                Ok(delivery) => delivery,
                Err(QueueError::Closed) => {
                    tracing::info!("Queue closed, worker exiting");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dequeue failed, backing off");
                    tokio::time::sleep(DEQUEUE_RETRY_BACKOFF).await;
                    continue;
                }
            };
            self.process(delivery).await;
        }
    }

    /// Drive one delivery through its full lifecycle.
    async fn process(&self, delivery: Delivery) {
        let Delivery { task, handle } = delivery;

        if task.reset {
            if let Err(e) = self.runtime.reset_session().await {
                tracing::warn!(error = %e, "Session reset failed");
            }
        }

        if !task.has_prompt() {
            // A parseable payload with nothing to dispatch can never become
            // valid: ack it and publish nothing. Reset-only tasks land here
            // by construction.
            if !task.reset {
                tracing::warn!(
                    id = task.id.as_deref().unwrap_or("-"),
                    "Skipping task with empty prompt"
                );
            }
            if let Err(e) = self.queue.acknowledge(&handle).await {
                tracing::warn!(error = %e, "Failed to acknowledge skipped delivery");
            }
            return;
        }

        self.slot
            .set(ActiveTask::new(task.id.clone(), task.source.clone()))
            .await;

        let outcome = self.coordinator.execute(&task).await;
        self.publisher
            .result(outcome.into_record(task.id.clone()))
            .await;

        self.slot.clear().await;

        // Strictly after the terminal result: a crash between publish and ack
        // leaves the task redeliverable, never falsely recorded as delivered.
        if let Err(e) = self.queue.acknowledge(&handle).await {
            tracing::warn!(error = %e, "Failed to acknowledge delivery");
        }
    }
}

/// Run the consume loop with the control router beside it, from pre-built
/// parts.
///
/// The router task is spawned before the first dequeue and lives for the
/// whole call, so control signals are applied concurrently with the consume
/// loop at all times. Returns when the queue closes; the router is stopped
/// on the way out.
pub async fn run_with(
    queue: Arc<dyn DeliveryChannel>,
    runtime: Arc<dyn AgentRuntime>,
    publisher: ResultPublisher,
    signals: mpsc::UnboundedReceiver<String>,
    mode: DeliveryMode,
) -> Result<()> {
    let slot = Arc::new(CurrentTaskSlot::new());
    let router = ControlRouter::new(runtime.clone(), queue.clone(), slot.clone(), mode);
    let router_task = tokio::spawn(router.run(signals));

    let worker = Worker::new(queue, runtime, publisher, slot);
    let result = worker.run().await;

    router_task.abort();
    result
}

/// Composition root for embedding binaries: connect the queue, output sink
/// and control subscription per `config`, then run until the queue closes.
pub async fn run(config: &WorkerConfig, runtime: Arc<dyn AgentRuntime>) -> Result<()> {
    let queue: Arc<dyn DeliveryChannel> = match config.mode {
        DeliveryMode::BestEffort => Arc::new(ListQueue::connect(config).await?),
        DeliveryMode::Reliable => Arc::new(StreamQueue::connect(config).await?),
    };
    let sink = Arc::new(RedisOutput::connect(config).await?);
    let publisher = ResultPublisher::new(sink);

    let (tx, rx) = mpsc::unbounded_channel();
    let pump = control::spawn_subscriber(&config.redis_url, &config.control_channel, tx).await?;

    let result = run_with(queue, runtime, publisher, rx, config.mode).await;
    pump.abort();
    result
}

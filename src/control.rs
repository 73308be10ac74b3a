//! Control bus router — out-of-band stop/steer/reset handling.
//!
//! Runs concurrently with the consume loop at all times; it is the only path
//! by which a long-running task can be interrupted. Signals apply to whatever
//! task occupies the current-task slot at arrival time — they are never
//! addressed to a specific task.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DeliveryMode;
use crate::error::QueueError;
use crate::protocol::{ControlSignal, TaskRequest};
use crate::queue::DeliveryChannel;
use crate::runtime::AgentRuntime;
use crate::slot::CurrentTaskSlot;

/// Prompt of the greeting task synthesized after a session reset.
pub const GREETING_PROMPT: &str =
    "The session was just reset. Greet the user briefly and let them know you are ready.";

/// Applies control signals against the current-task slot and the runtime.
pub struct ControlRouter {
    runtime: Arc<dyn AgentRuntime>,
    queue: Arc<dyn DeliveryChannel>,
    slot: Arc<CurrentTaskSlot>,
    allow_legacy_stop: bool,
}

impl ControlRouter {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        queue: Arc<dyn DeliveryChannel>,
        slot: Arc<CurrentTaskSlot>,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            runtime,
            queue,
            slot,
            // The bare STOP literal predates the JSON contract and was only
            // ever produced for list-mode workers.
            allow_legacy_stop: mode == DeliveryMode::BestEffort,
        }
    }

    /// Consume raw control payloads until the channel closes.
    pub async fn run(self, mut signals: mpsc::UnboundedReceiver<String>) {
        while let Some(raw) = signals.recv().await {
            self.handle(&raw).await;
        }
        tracing::debug!("Control channel closed, router exiting");
    }

    /// Handle one raw payload. Malformed payloads are logged and dropped.
    pub async fn handle(&self, raw: &str) {
        match ControlSignal::parse(raw, self.allow_legacy_stop) {
            Ok(signal) => self.apply(signal).await,
            Err(e) => {
                tracing::warn!(error = %e, payload = raw, "Dropping malformed control payload");
            }
        }
    }

    async fn apply(&self, signal: ControlSignal) {
        match signal {
            ControlSignal::Stop => match self.slot.get().await {
                Some(active) => {
                    tracing::info!(
                        id = active.id.as_deref().unwrap_or("-"),
                        "Stop requested, aborting current task"
                    );
                    self.runtime.abort();
                }
                None => tracing::debug!("Stop received with no active task"),
            },
            ControlSignal::Steer { message } => {
                let Some(message) = message else {
                    tracing::warn!("Dropping steer signal without a message");
                    return;
                };
                if self.slot.get().await.is_none() {
                    // Steering an idle worker is a no-op, not an error.
                    tracing::info!("Dropping steer signal, no task is active");
                    return;
                }
                if let Err(e) = self.runtime.steer(&message).await {
                    tracing::warn!(error = %e, "Steer failed");
                }
            }
            ControlSignal::Reset { id } => {
                // The id is informational only and is never validated against
                // the slot; reset applies regardless of what is running.
                tracing::info!(id = id.as_deref().unwrap_or("-"), "Reset requested");
                if let Err(e) = self.runtime.reset_session().await {
                    tracing::warn!(error = %e, "Session reset failed");
                }
                let greeting = TaskRequest::fire_and_forget(GREETING_PROMPT);
                if let Err(e) = self.queue.enqueue(&greeting).await {
                    tracing::warn!(error = %e, "Failed to enqueue greeting task after reset");
                }
            }
        }
    }
}

/// Subscribe to the control channel and pump raw payloads into `tx`.
///
/// Subscription failure is a startup error; once running, the pump only logs
/// problems and never crashes.
pub async fn spawn_subscriber(
    redis_url: &str,
    channel: &str,
    tx: mpsc::UnboundedSender<String>,
) -> Result<JoinHandle<()>, QueueError> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    tracing::info!(channel, "Subscribed to control channel");

    let channel = channel.to_string();
    Ok(tokio::spawn(async move {
        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping non-text control payload");
                    continue;
                }
            };
            if tx.send(payload).is_err() {
                break;
            }
        }
        tracing::warn!(channel = %channel, "Control subscription ended");
    }))
}

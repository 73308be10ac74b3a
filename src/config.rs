//! Worker configuration.

use std::str::FromStr;

use crate::error::ConfigError;

/// Delivery semantics for the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// List pop with no acknowledgment; a crash mid-task loses the message.
    BestEffort,
    /// Stream consumer group with claim/ack; a crash before ack makes the
    /// message redeliverable to another consumer.
    Reliable,
}

impl FromStr for DeliveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" | "list" => Ok(Self::BestEffort),
            "reliable" | "stream" => Ok(Self::Reliable),
            other => Err(ConfigError::InvalidValue {
                key: "delivery_mode".to_string(),
                message: format!("unknown mode '{other}' (expected best_effort or reliable)"),
            }),
        }
    }
}

/// Configuration for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Task queue key (list key in best-effort mode, stream key in reliable mode).
    pub queue_key: String,
    /// Consumer group name (reliable mode only).
    pub group: String,
    /// Consumer name within the group (reliable mode only).
    pub consumer: String,
    /// Pub/sub channel carrying control signals.
    pub control_channel: String,
    /// Output list key for progress and result records.
    pub output_key: String,
    /// Delivery semantics.
    pub mode: DeliveryMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_key: "tasks".to_string(),
            group: "relay-workers".to_string(),
            consumer: format!("worker-{}", uuid::Uuid::new_v4()),
            control_channel: "control".to_string(),
            output_key: "results".to_string(),
            mode: DeliveryMode::Reliable,
        }
    }
}

impl WorkerConfig {
    /// Build configuration from `TASK_RELAY_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("TASK_RELAY_REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(key) = std::env::var("TASK_RELAY_QUEUE") {
            config.queue_key = key;
        }
        if let Ok(group) = std::env::var("TASK_RELAY_GROUP") {
            config.group = group;
        }
        if let Ok(consumer) = std::env::var("TASK_RELAY_CONSUMER") {
            config.consumer = consumer;
        }
        if let Ok(channel) = std::env::var("TASK_RELAY_CONTROL_CHANNEL") {
            config.control_channel = channel;
        }
        if let Ok(key) = std::env::var("TASK_RELAY_OUTPUT") {
            config.output_key = key;
        }
        if let Ok(mode) = std::env::var("TASK_RELAY_DELIVERY_MODE") {
            config.mode = mode.parse()?;
        }

        Ok(config)
    }
}

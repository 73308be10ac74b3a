//! Error types for the relay worker.

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Delivery-channel errors.
///
/// Every variant except `Closed` is treated as transient by the consume
/// loop: it backs off and re-enters, it never crashes the process.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue connection failed: {0}")]
    Connection(String),

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Failed to encode task payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Queue closed")]
    Closed,
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Backend(e.to_string())
        }
    }
}

/// Output-channel errors. Publish failures are logged and dropped, never
/// retried and never fatal.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Output backend error: {0}")]
    Backend(String),

    #[error("Failed to encode output record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<redis::RedisError> for PublishError {
    fn from(e: redis::RedisError) -> Self {
        PublishError::Backend(e.to_string())
    }
}

/// Agent runtime errors, as surfaced across the dispatch boundary.
///
/// `Aborted` is the distinguished signature raised when an in-flight
/// dispatch is cancelled via `abort()`. It maps to a fixed user-facing
/// message, never to the raw internal error text.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("Task aborted by user")]
    Aborted,

    #[error("Agent session failed: {0}")]
    Session(String),
}

/// Fixed user-facing message for aborted tasks.
pub const ABORT_MESSAGE: &str = "Task aborted by user";

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;

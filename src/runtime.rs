//! Agent runtime boundary.
//!
//! The runtime that actually interprets a prompt lives outside this crate.
//! This module fixes the interface the worker consumes: dispatch one prompt
//! at a time, observe the session's lifecycle events while it runs, and
//! abort/steer/reset out of band.

use tokio::sync::broadcast;

use crate::error::RuntimeError;

/// Role of the author of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Assistant,
    User,
    System,
}

/// One content block of a session message.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text(String),
    /// Non-text blocks (tool use, attachments) are carried opaquely; they
    /// never contribute to accumulated response text.
    Other(serde_json::Value),
}

/// Lifecycle event emitted by the agent runtime while a dispatch is running.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageStart {
        role: MessageRole,
    },
    MessageEnd {
        role: MessageRole,
        content: Vec<ContentBlock>,
    },
    ToolStart {
        name: String,
        args: serde_json::Value,
    },
    ToolEnd {
        name: String,
        result: serde_json::Value,
        is_error: bool,
    },
}

/// The external agent runtime, as consumed by the worker.
///
/// `subscribe` returns a broadcast receiver; dropping it is the unsubscribe.
/// The coordinator subscribes before invoking `dispatch` so no event can be
/// missed between dispatch and the first emission.
#[async_trait::async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Run one prompt to completion in the long-lived session.
    ///
    /// Returns `RuntimeError::Aborted` when cancelled via [`abort`], and
    /// `RuntimeError::Session` for every other failure.
    ///
    /// [`abort`]: AgentRuntime::abort
    async fn dispatch(&self, prompt: &str) -> Result<(), RuntimeError>;

    /// Subscribe to the session event stream.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Request cancellation of the in-flight dispatch. Fire-and-forget;
    /// the dispatch is expected to resolve promptly with `Aborted`.
    fn abort(&self);

    /// Inject a steering message into the running session.
    async fn steer(&self, message: &str) -> Result<(), RuntimeError>;

    /// Discard accumulated session state.
    async fn reset_session(&self) -> Result<(), RuntimeError>;
}

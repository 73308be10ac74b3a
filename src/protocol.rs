//! Wire contracts for the queue, control bus, and output channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A task request as read from the delivery channel.
///
/// Only `prompt` is required on the wire. A missing `id` makes the task
/// fire-and-forget: progress and results are still published but carry no
/// correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub prompt: String,
    /// Origin tag set by the producer (e.g. "telegram", "cron").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// When set, the session is reset before the prompt (if any) runs.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reset: bool,
}

impl TaskRequest {
    /// Create a fire-and-forget task with just a prompt.
    pub fn fire_and_forget(prompt: impl Into<String>) -> Self {
        Self {
            id: None,
            prompt: prompt.into(),
            source: None,
            reset: false,
        }
    }

    /// Whether the task carries anything dispatchable.
    pub fn has_prompt(&self) -> bool {
        !self.prompt.trim().is_empty()
    }
}

/// Out-of-band control signal.
///
/// Signals are scoped to whatever task is currently running; they are never
/// addressed by task id. The `id` on `reset` is informational only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ControlSignal {
    Stop,
    Steer {
        #[serde(default)]
        message: Option<String>,
    },
    Reset {
        #[serde(default)]
        id: Option<String>,
    },
}

impl ControlSignal {
    /// Parse a raw control payload.
    ///
    /// `allow_legacy_stop` admits the bare literal `STOP` used by older
    /// best-effort producers; in reliable mode it is rejected like any other
    /// malformed payload.
    pub fn parse(raw: &str, allow_legacy_stop: bool) -> Result<Self, serde_json::Error> {
        if allow_legacy_stop && raw.trim() == "STOP" {
            return Ok(ControlSignal::Stop);
        }
        serde_json::from_str(raw)
    }
}

/// Progress event kind on the output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    LlmStart,
    LlmEnd,
    ToolStart,
    ToolEnd,
}

/// A record written to the output channel: either a progress event or the
/// terminal result for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputRecord {
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        event: ProgressKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        response: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: String,
    },
}

impl OutputRecord {
    pub fn progress(id: Option<String>, event: ProgressKind, data: Option<Value>) -> Self {
        Self::Progress { id, event, data }
    }

    /// Whether this is a terminal (non-progress) record.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Terminal outcome of one task, before serialization to the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(String),
    Failed(String),
    Aborted,
}

impl TaskOutcome {
    /// Convert into the output-channel record, attaching the task id.
    ///
    /// An abort maps to an error record with the fixed user-facing message,
    /// not to the raw runtime error text.
    pub fn into_record(self, id: Option<String>) -> OutputRecord {
        match self {
            Self::Success(response) => OutputRecord::Success { id, response },
            Self::Failed(error) => OutputRecord::Error { id, error },
            Self::Aborted => OutputRecord::Error {
                id,
                error: crate::error::ABORT_MESSAGE.to_string(),
            },
        }
    }
}

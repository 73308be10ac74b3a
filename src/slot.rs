//! Process-wide current-task slot.
//!
//! Control signals are scoped to "whatever task is currently running", never
//! addressed by id, so the worker keeps exactly one shared record of the
//! in-flight task. The consume loop writes it on transition boundaries; the
//! control router only reads it.

use tokio::sync::RwLock;

/// Identity of the task presently executing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTask {
    pub id: Option<String>,
    pub source: Option<String>,
}

impl ActiveTask {
    pub fn new(id: Option<String>, source: Option<String>) -> Self {
        Self { id, source }
    }
}

/// Holder for at most one in-flight task.
///
/// Exposed only through `set`/`clear`/`get`; the lock guarantees the control
/// router never observes a half-updated slot.
#[derive(Debug, Default)]
pub struct CurrentTaskSlot {
    inner: RwLock<Option<ActiveTask>>,
}

impl CurrentTaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a task as current. Called by the consume loop on dequeue.
    pub async fn set(&self, task: ActiveTask) {
        let mut slot = self.inner.write().await;
        if let Some(previous) = slot.replace(task) {
            // Single-task invariant: the loop always clears before the next set.
            tracing::warn!(?previous, "Current-task slot overwritten while occupied");
        }
    }

    /// Clear the slot. Called by the consume loop on terminal outcome.
    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }

    /// Snapshot of the current task, if any.
    pub async fn get(&self) -> Option<ActiveTask> {
        self.inner.read().await.clone()
    }

    pub async fn is_occupied(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

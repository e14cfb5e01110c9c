use std::time::Duration;

use thiserror::Error;

/// Unique handle for a submitted captioning task.
///
/// Allocated at submission (random v4), stable for the task's lifetime,
/// never reused within a process run.
pub type TaskId = uuid::Uuid;

/// Successful captioning outcome recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    /// Generated description text.
    pub text: String,
    /// Name of the model that produced the text.
    pub model: String,
    /// Wall-clock time spent inside the backend for this task.
    pub duration: Duration,
}

/// Lifecycle state of a task managed by the [`TaskRunner`].
///
/// The terminal variants carry their outcome inline, so a completed task can
/// never hold an error and a failed task can never hold a caption.
///
/// [`TaskRunner`]: crate::TaskRunner
#[derive(Debug, Clone)]
pub enum TaskStatus {
    /// Accepted and queued; the worker has not picked it up yet.
    Pending,
    /// The worker is executing this task's backend call.
    Processing,
    /// The backend produced a caption.
    Completed { caption: Caption },
    /// The backend reported an error for this task.
    Failed { error: String },
}

impl TaskStatus {
    /// Returns `true` once the task has reached `Completed` or `Failed`.
    ///
    /// Pollers waiting for a task to finish should use this rather than
    /// matching variants directly.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed { .. } | TaskStatus::Failed { .. })
    }

    /// Canonical upper-case name of the state, as reported to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed { .. } => "COMPLETED",
            TaskStatus::Failed { .. } => "FAILED",
        }
    }
}

/// A read-only snapshot of one task, detached from the ledger.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub id: TaskId,
    pub status: TaskStatus,
}

/// Errors produced by the task runtime.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Admission rejected: the pending queue is at capacity. Retryable once
    /// the worker has drained a task.
    #[error("task queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The referenced task does not exist.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },
}

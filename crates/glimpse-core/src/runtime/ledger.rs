use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::imaging::ImagePayload;
use crate::runtime::types::{Caption, RuntimeError, TaskId, TaskStatus, TaskView};

/// The complete in-memory record for a single submitted task.
#[derive(Debug)]
struct TaskRecord {
    status: TaskStatus,
    /// Present from submission until the worker takes the task.
    payload: Option<ImagePayload>,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<TaskId, TaskRecord>,
    /// Handles in submission order; drives `list` ordering. Never shrinks.
    order: Vec<TaskId>,
    /// Handles still waiting for the worker, oldest first.
    pending: VecDeque<TaskId>,
}

/// Centralized, thread-safe store of all task records.
///
/// A `tokio::sync::RwLock` guards the state so many pollers can read
/// concurrently while submissions and the worker mutate under short write
/// sections. The lock is never held across a backend call.
///
/// Records are never evicted: completed and failed tasks stay readable for
/// the lifetime of the process.
#[derive(Debug, Clone)]
pub struct TaskLedger {
    capacity: usize,
    inner: Arc<RwLock<LedgerState>>,
}

impl TaskLedger {
    /// Create an empty ledger admitting at most `capacity` pending tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(RwLock::new(LedgerState::default())),
        }
    }

    /// Admit a new task in `Pending` state and return its handle.
    ///
    /// The capacity check, handle allocation, and insertion all happen under
    /// one write section, so concurrent submissions can never jointly
    /// overshoot the pending capacity.
    pub async fn submit(&self, payload: ImagePayload) -> Result<TaskId, RuntimeError> {
        let mut state = self.inner.write().await;
        if state.pending.len() >= self.capacity {
            return Err(RuntimeError::QueueFull {
                capacity: self.capacity,
            });
        }
        let task_id = Uuid::new_v4();
        state.records.insert(
            task_id,
            TaskRecord {
                status: TaskStatus::Pending,
                payload: Some(payload),
            },
        );
        state.order.push(task_id);
        state.pending.push_back(task_id);
        Ok(task_id)
    }

    /// Pop the oldest pending task, mark it `Processing`, and move its
    /// payload out — all under one write section. This is the only place
    /// service order is decided.
    pub async fn take_next_pending(&self) -> Option<(TaskId, ImagePayload)> {
        let mut state = self.inner.write().await;
        let task_id = state.pending.pop_front()?;
        let record = state.records.get_mut(&task_id)?;
        record.status = TaskStatus::Processing;
        let payload = record.payload.take()?;
        Some((task_id, payload))
    }

    /// Record a successful outcome.
    ///
    /// Silently a no-op when the handle is unknown or the record is not
    /// currently `Processing` (terminal states are final).
    pub async fn set_completed(&self, task_id: TaskId, caption: Caption) {
        if let Some(record) = self.inner.write().await.records.get_mut(&task_id) {
            if matches!(record.status, TaskStatus::Processing) {
                record.status = TaskStatus::Completed { caption };
            }
        }
    }

    /// Record a failure. Same no-op rules as [`TaskLedger::set_completed`].
    pub async fn set_failed(&self, task_id: TaskId, error: impl Into<String>) {
        if let Some(record) = self.inner.write().await.records.get_mut(&task_id) {
            if matches!(record.status, TaskStatus::Processing) {
                record.status = TaskStatus::Failed {
                    error: error.into(),
                };
            }
        }
    }

    /// Snapshot of one task, or `None` for an unknown handle.
    pub async fn get(&self, task_id: TaskId) -> Option<TaskView> {
        self.inner.read().await.records.get(&task_id).map(|r| TaskView {
            id: task_id,
            status: r.status.clone(),
        })
    }

    /// Point-in-time snapshot of every task, in submission order.
    pub async fn list(&self) -> Vec<TaskView> {
        let state = self.inner.read().await;
        state
            .order
            .iter()
            .filter_map(|id| {
                state.records.get(id).map(|r| TaskView {
                    id: *id,
                    status: r.status.clone(),
                })
            })
            .collect()
    }

    /// Number of tasks currently waiting for the worker.
    pub async fn pending_len(&self) -> usize {
        self.inner.read().await.pending.len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

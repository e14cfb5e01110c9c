use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::CaptionBackend;
use crate::imaging::ImagePayload;
use crate::runtime::ledger::TaskLedger;
use crate::runtime::types::{Caption, RuntimeError, TaskId, TaskView};

/// Tuning knobs for [`TaskRunner::start`].
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Maximum number of tasks waiting in `Pending` at any one time.
    pub queue_capacity: usize,
    /// How long the worker sleeps between queue checks when idle. Submissions
    /// wake it immediately; this only bounds the fallback latency.
    pub poll_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Handle to the captioning task runtime.
///
/// Composes the task ledger with the single background worker draining it.
/// Constructed once at startup and cloned into every caller — there is no
/// global instance, and dropping the last clone shuts the worker down.
///
/// # Usage
///
/// ```rust,ignore
/// let runner = TaskRunner::start(backend, RunnerOptions::default());
/// let task_id = runner.submit(payload).await?;
/// let view = runner.get(task_id).await?;
/// runner.stop().await;
/// ```
#[derive(Debug, Clone)]
pub struct TaskRunner {
    ledger: TaskLedger,
    /// Signalled on every submission so the idle worker wakes immediately.
    wake: Arc<Notify>,
    /// Cooperative stop signal observed by the worker between tasks.
    stop_tx: Arc<watch::Sender<bool>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TaskRunner {
    /// Start the runtime: create the ledger and spawn the worker loop.
    pub fn start(backend: Arc<dyn CaptionBackend>, options: RunnerOptions) -> Self {
        let ledger = TaskLedger::new(options.queue_capacity);
        let wake = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = tokio::spawn(Self::run_loop(
            ledger.clone(),
            Arc::clone(&backend),
            Arc::clone(&wake),
            stop_rx,
            options.poll_interval,
        ));

        info!(
            queue_capacity = options.queue_capacity,
            backend = backend.name(),
            "caption task runner started"
        );

        Self {
            ledger,
            wake,
            stop_tx: Arc::new(stop_tx),
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    // ── Public API ───────────────────────────────────────────────────────────

    /// Admit a new captioning task.
    ///
    /// Returns the task's handle immediately; the image is processed in the
    /// background. Fails with [`RuntimeError::QueueFull`] when the pending
    /// queue is at capacity — the caller may retry after the worker drains.
    pub async fn submit(&self, payload: ImagePayload) -> Result<TaskId, RuntimeError> {
        let task_id = self.ledger.submit(payload).await?;
        self.wake.notify_one();
        debug!(%task_id, "task submitted");
        Ok(task_id)
    }

    /// Snapshot of one task's current state.
    pub async fn get(&self, task_id: TaskId) -> Result<TaskView, RuntimeError> {
        self.ledger
            .get(task_id)
            .await
            .ok_or(RuntimeError::TaskNotFound { task_id })
    }

    /// Snapshot of every task, in submission order.
    pub async fn list(&self) -> Vec<TaskView> {
        self.ledger.list().await
    }

    /// Signal the worker to stop and wait for it to exit. Idempotent.
    ///
    /// An in-flight backend call is abandoned, leaving that task `Processing`
    /// forever — abrupt shutdown is a documented source of such records.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "caption worker exited abnormally");
            }
            info!("caption task runner stopped");
        }
    }

    // ── Worker loop ──────────────────────────────────────────────────────────

    async fn run_loop(
        ledger: TaskLedger,
        backend: Arc<dyn CaptionBackend>,
        wake: Arc<Notify>,
        mut stop_rx: watch::Receiver<bool>,
        poll_interval: Duration,
    ) {
        debug!("caption worker running");
        loop {
            if *stop_rx.borrow() {
                break;
            }

            match ledger.take_next_pending().await {
                Some((task_id, payload)) => {
                    Self::process(&ledger, backend.as_ref(), task_id, payload, &mut stop_rx)
                        .await;
                }
                None => {
                    // Idle: wait for a submission, the fallback tick, or
                    // shutdown. A closed stop channel means every runner
                    // handle is gone and nothing can submit again.
                    tokio::select! {
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                        changed = stop_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!("caption worker exited");
    }

    /// Run one task to its terminal state (or abandon it on shutdown).
    ///
    /// The ledger lock is never held here: a slow backend must not block
    /// submissions or status reads. A panicking backend marks the task failed
    /// and the loop carries on.
    async fn process(
        ledger: &TaskLedger,
        backend: &dyn CaptionBackend,
        task_id: TaskId,
        payload: ImagePayload,
        stop_rx: &mut watch::Receiver<bool>,
    ) {
        info!(%task_id, "task processing");
        let started = Instant::now();
        let generate = AssertUnwindSafe(backend.generate(&payload)).catch_unwind();

        tokio::select! {
            outcome = generate => {
                let duration = started.elapsed();
                match outcome {
                    Ok(Ok(text)) => {
                        info!(%task_id, elapsed_ms = duration.as_millis() as u64, "task completed");
                        let caption = Caption {
                            text,
                            model: backend.name().to_owned(),
                            duration,
                        };
                        ledger.set_completed(task_id, caption).await;
                    }
                    Ok(Err(e)) => {
                        warn!(%task_id, error = %e, "task failed");
                        ledger.set_failed(task_id, e.to_string()).await;
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(%task_id, panic = message, "backend panicked");
                        ledger
                            .set_failed(task_id, format!("backend panicked: {message}"))
                            .await;
                    }
                }
            }
            _ = stop_rx.changed() => {
                warn!(%task_id, "shutdown requested; abandoning in-flight task");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

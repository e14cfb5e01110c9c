use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};

use crate::backend::{BackendError, CaptionBackend};
use crate::imaging::ImagePayload;
use crate::runtime::runner::{RunnerOptions, TaskRunner};
use crate::runtime::types::{RuntimeError, TaskId, TaskStatus};

// ── Test backends ──────────────────────────────────────────────────────────────

/// Completes every task with `"a cat"` after a small fixed delay.
struct StubBackend;

#[async_trait]
impl CaptionBackend for StubBackend {
    fn name(&self) -> &str {
        "STUB"
    }

    async fn generate(&self, _image: &ImagePayload) -> Result<String, BackendError> {
        sleep(Duration::from_millis(30)).await;
        Ok("a cat".to_owned())
    }
}

/// Fails images whose probe pixel is 13, succeeds otherwise.
struct FlakyBackend;

#[async_trait]
impl CaptionBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate(&self, image: &ImagePayload) -> Result<String, BackendError> {
        if image.as_rgb().get_pixel(0, 0)[0] == 13 {
            Err(BackendError::new("bad input"))
        } else {
            Ok("fine".to_owned())
        }
    }
}

/// Panics on every call.
struct PanickingBackend;

#[async_trait]
impl CaptionBackend for PanickingBackend {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn generate(&self, _image: &ImagePayload) -> Result<String, BackendError> {
        panic!("backend exploded");
    }
}

/// Records the probe pixel of every image it sees, in service order.
struct RecordingBackend {
    seen: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl CaptionBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, image: &ImagePayload) -> Result<String, BackendError> {
        self.seen
            .lock()
            .expect("recorder lock")
            .push(image.as_rgb().get_pixel(0, 0)[0]);
        Ok("seen".to_owned())
    }
}

/// Blocks each call until the test releases one permit.
struct GatedBackend {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl CaptionBackend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _image: &ImagePayload) -> Result<String, BackendError> {
        let permit = self.gate.acquire().await.expect("gate open");
        permit.forget();
        Ok("released".to_owned())
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────────

fn tiny_image(seed: u8) -> ImagePayload {
    ImagePayload::from_rgb(image::RgbImage::from_pixel(1, 1, image::Rgb([seed, 0, 0])))
}

fn options(queue_capacity: usize) -> RunnerOptions {
    RunnerOptions {
        queue_capacity,
        poll_interval: Duration::from_millis(10),
    }
}

async fn wait_terminal(runner: &TaskRunner, task_id: TaskId) -> TaskStatus {
    timeout(Duration::from_secs(5), async {
        loop {
            let view = runner.get(task_id).await.expect("task should exist");
            if view.status.is_terminal() {
                return view.status;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task did not reach a terminal state in time")
}

async fn wait_processing(runner: &TaskRunner, task_id: TaskId) {
    timeout(Duration::from_secs(5), async {
        loop {
            let view = runner.get(task_id).await.expect("task should exist");
            if matches!(view.status, TaskStatus::Processing) {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task never started processing")
}

// ── Submission and lookup ──────────────────────────────────────────────────────

#[tokio::test]
async fn submissions_get_distinct_handles() {
    let runner = TaskRunner::start(Arc::new(StubBackend), options(8));

    let a = runner.submit(tiny_image(1)).await.expect("first admitted");
    let b = runner.submit(tiny_image(2)).await.expect("second admitted");
    assert_ne!(a, b);

    runner.stop().await;
}

#[tokio::test]
async fn unknown_handle_is_not_found() {
    let runner = TaskRunner::start(Arc::new(StubBackend), options(8));

    let err = runner.get(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::TaskNotFound { .. }));

    runner.stop().await;
}

// ── Admission control ──────────────────────────────────────────────────────────

#[tokio::test]
async fn full_queue_rejects_then_recovers_after_drain() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = Arc::new(GatedBackend {
        gate: Arc::clone(&gate),
    });
    let runner = TaskRunner::start(backend, options(2));

    // P1 is picked up by the worker and blocks on the gate; P2 and P3 fill
    // the pending queue.
    let p1 = runner.submit(tiny_image(1)).await.expect("p1 admitted");
    wait_processing(&runner, p1).await;
    let p2 = runner.submit(tiny_image(2)).await.expect("p2 admitted");
    let p3 = runner.submit(tiny_image(3)).await.expect("p3 admitted");

    let err = runner.submit(tiny_image(4)).await.unwrap_err();
    assert!(matches!(err, RuntimeError::QueueFull { capacity: 2 }));

    gate.add_permits(3);
    for id in [p1, p2, p3] {
        assert!(matches!(
            wait_terminal(&runner, id).await,
            TaskStatus::Completed { .. }
        ));
    }

    // The queue has drained; the rejected payload is admitted on retry.
    let p4 = runner.submit(tiny_image(4)).await.expect("resubmission");
    gate.add_permits(1);
    assert!(matches!(
        wait_terminal(&runner, p4).await,
        TaskStatus::Completed { .. }
    ));

    runner.stop().await;
}

// ── Lifecycle and results ──────────────────────────────────────────────────────

#[tokio::test]
async fn completed_task_reports_caption_model_and_duration() {
    let runner = TaskRunner::start(Arc::new(StubBackend), options(4));

    let id = runner.submit(tiny_image(7)).await.expect("admitted");
    let early = runner.get(id).await.expect("task exists");
    assert!(
        !early.status.is_terminal(),
        "a fresh task must be pending or processing, got {:?}",
        early.status
    );

    match wait_terminal(&runner, id).await {
        TaskStatus::Completed { caption } => {
            assert_eq!(caption.text, "a cat");
            assert_eq!(caption.model, "STUB");
            assert!(
                caption.duration >= Duration::from_millis(25),
                "duration should cover the backend delay, got {:?}",
                caption.duration
            );
        }
        other => panic!("expected completion, got {other:?}"),
    }

    runner.stop().await;
}

#[tokio::test]
async fn observed_status_sequence_never_regresses() {
    fn rank(status: &TaskStatus) -> u8 {
        match status {
            TaskStatus::Pending => 0,
            TaskStatus::Processing => 1,
            TaskStatus::Completed { .. } | TaskStatus::Failed { .. } => 2,
        }
    }

    let runner = TaskRunner::start(Arc::new(StubBackend), options(4));
    let id = runner.submit(tiny_image(1)).await.expect("admitted");

    let mut ranks = Vec::new();
    loop {
        let view = runner.get(id).await.expect("task exists");
        ranks.push(rank(&view.status));
        if view.status.is_terminal() {
            break;
        }
        sleep(Duration::from_millis(1)).await;
    }

    assert!(
        ranks.windows(2).all(|w| w[0] <= w[1]),
        "status regressed: {ranks:?}"
    );

    runner.stop().await;
}

// ── Failure isolation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn backend_failure_is_recorded_and_isolated() {
    let runner = TaskRunner::start(Arc::new(FlakyBackend), options(4));

    let bad = runner.submit(tiny_image(13)).await.expect("bad admitted");
    let good = runner.submit(tiny_image(1)).await.expect("good admitted");

    match wait_terminal(&runner, bad).await {
        TaskStatus::Failed { error } => assert_eq!(error, "bad input"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(
        wait_terminal(&runner, good).await,
        TaskStatus::Completed { .. }
    ));

    runner.stop().await;
}

#[tokio::test]
async fn panicking_backend_marks_task_failed_and_worker_survives() {
    let runner = TaskRunner::start(Arc::new(PanickingBackend), options(4));

    let first = runner.submit(tiny_image(1)).await.expect("first admitted");
    match wait_terminal(&runner, first).await {
        TaskStatus::Failed { error } => assert!(
            error.contains("backend exploded"),
            "panic message should be preserved, got {error:?}"
        ),
        other => panic!("expected failure, got {other:?}"),
    }

    // The worker is still alive: a second task also reaches a terminal state.
    let second = runner.submit(tiny_image(2)).await.expect("second admitted");
    assert!(wait_terminal(&runner, second).await.is_terminal());

    runner.stop().await;
}

// ── Ordering ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tasks_start_in_submission_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let backend = Arc::new(RecordingBackend {
        seen: Arc::clone(&seen),
    });
    let runner = TaskRunner::start(backend, options(16));

    let mut ids = Vec::new();
    for seed in 1..=6 {
        ids.push(runner.submit(tiny_image(seed)).await.expect("admitted"));
    }
    for id in ids {
        wait_terminal(&runner, id).await;
    }

    assert_eq!(*seen.lock().expect("recorder lock"), vec![1, 2, 3, 4, 5, 6]);

    runner.stop().await;
}

// ── Shutdown ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_returns_promptly_and_abandons_in_flight_task() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = Arc::new(GatedBackend {
        gate: Arc::clone(&gate),
    });
    let runner = TaskRunner::start(backend, options(4));

    let id = runner.submit(tiny_image(1)).await.expect("admitted");
    wait_processing(&runner, id).await;

    // The gate is never released; stop must not wait for the backend.
    timeout(Duration::from_secs(1), runner.stop())
        .await
        .expect("stop should not hang on an in-flight task");

    // The abandoned task is stuck in Processing — the documented limitation.
    let view = runner.get(id).await.expect("record still readable");
    assert!(matches!(view.status, TaskStatus::Processing));

    // stop is idempotent.
    runner.stop().await;
}

#[tokio::test]
async fn stopped_worker_leaves_later_submissions_pending() {
    let runner = TaskRunner::start(Arc::new(StubBackend), options(4));
    runner.stop().await;

    // Admission still works (the ledger is independent of the worker), but
    // nothing will drain the queue anymore.
    let id = runner.submit(tiny_image(1)).await.expect("admitted");
    sleep(Duration::from_millis(50)).await;
    let view = runner.get(id).await.expect("task exists");
    assert!(matches!(view.status, TaskStatus::Pending));
}

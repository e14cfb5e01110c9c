//! Captioning routes: synchronous one-shot plus the async task queue.
//!
//! Uploads are raw request bodies in any format the image codecs accept.
//! `POST /caption` blocks until the backend answers. `POST /caption-task`
//! returns a task id immediately; callers poll `GET /caption-task/{id}` or
//! list everything via `GET /caption-task`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use glimpse_core::imaging::ImagePayload;
use glimpse_core::{TaskStatus, TaskView};

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/caption", post(caption_sync))
        .route("/caption-task", post(submit_task).get(list_tasks))
        .route("/caption-task/{id}", get(get_task))
}

// ── Response shapes ───────────────────────────────────────────────────────────

/// Response for the synchronous `POST /caption` route.
#[derive(Debug, Serialize)]
struct SyncCaptionResponse {
    caption: String,
    model_name: String,
    processing_time: f64,
}

/// A finished caption inside a task's status entry.
#[derive(Debug, Serialize)]
struct CaptionResult {
    caption: String,
    model: String,
    /// Backend time in seconds, measured by the worker.
    processing_time: f64,
}

/// Status entry for one task, without its id.
#[derive(Debug, Serialize)]
struct TaskEntry {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<CaptionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Response for `GET /caption-task/{id}`.
#[derive(Debug, Serialize)]
struct TaskStatusResponse {
    task_id: Uuid,
    #[serde(flatten)]
    entry: TaskEntry,
}

fn to_entry(status: TaskStatus) -> TaskEntry {
    let label = status.as_str();
    let (result, error) = match status {
        TaskStatus::Completed { caption } => (
            Some(CaptionResult {
                caption: caption.text,
                model: caption.model,
                processing_time: caption.duration.as_secs_f64(),
            }),
            None,
        ),
        TaskStatus::Failed { error } => (None, Some(error)),
        TaskStatus::Pending | TaskStatus::Processing => (None, None),
    };
    TaskEntry { status: label, result, error }
}

fn to_status_response(view: TaskView) -> TaskStatusResponse {
    TaskStatusResponse {
        task_id: view.id,
        entry: to_entry(view.status),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// One-shot captioning (`POST /caption`).
///
/// Decodes the body, runs the backend inline and returns the caption with the
/// measured processing time. Bypasses the task queue entirely.
async fn caption_sync(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SyncCaptionResponse>, ServerError> {
    debug!(body_len = body.len(), "synchronous caption request");
    let image = decode_upload(&state, &body)?;

    let started = Instant::now();
    let text = state
        .backend
        .generate(&image)
        .await
        .map_err(|e| ServerError::Backend(e.to_string()))?;
    let duration = started.elapsed();

    info!(
        elapsed_ms = duration.as_millis() as u64,
        "synchronous caption served"
    );
    Ok(Json(SyncCaptionResponse {
        caption: text,
        model_name: state.backend.name().to_owned(),
        processing_time: duration.as_secs_f64(),
    }))
}

/// Queue a captioning task (`POST /caption-task`).
///
/// Answers `{"task_id": "..."}` right away; a 429 means the queue is full
/// and the caller should retry later.
async fn submit_task(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ServerError> {
    debug!(body_len = body.len(), "caption task submission");
    let image = decode_upload(&state, &body)?;
    let task_id = state.runner.submit(image).await?;
    info!(%task_id, "caption task queued");
    Ok(Json(json!({ "task_id": task_id })))
}

/// Poll one task (`GET /caption-task/{id}`).
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ServerError> {
    let task_id = Uuid::parse_str(&id)
        .map_err(|_| ServerError::BadRequest(format!("malformed task id '{id}'")))?;
    let view = state.runner.get(task_id).await?;
    Ok(Json(to_status_response(view)))
}

/// List all known tasks (`GET /caption-task`), oldest submission first.
async fn list_tasks(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ServerError> {
    let views = state.runner.list().await;
    let mut map = serde_json::Map::with_capacity(views.len());
    for view in views {
        let entry = serde_json::to_value(to_entry(view.status))
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        map.insert(view.id.to_string(), entry);
    }
    Ok(Json(Value::Object(map)))
}

// ── private helpers ──────────────────────────────────────────────────────────

/// Decode and normalize an uploaded image body.
///
/// Empty bodies and undecodable bytes are caller errors, not server faults.
fn decode_upload(state: &AppState, body: &Bytes) -> Result<ImagePayload, ServerError> {
    if body.is_empty() {
        return Err(ServerError::BadRequest("No image provided".into()));
    }
    ImagePayload::from_bytes(body, state.config.max_image_size)
        .map_err(|e| ServerError::BadRequest(format!("invalid image: {e}")))
}

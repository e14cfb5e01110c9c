//! Unified server error type.
//!
//! Every handler returns `Result<_, ServerError>`; the [`IntoResponse`] impl
//! turns the error into a JSON body with the matching status code.
//!
//! **Security note:** internal failures are logged with full detail but the
//! client only ever sees a generic message, so backend errors, file paths and
//! upstream responses never leak through the API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use glimpse_core::RuntimeError;

/// Message returned for any server-side failure.
const INTERNAL_MESSAGE: &str = "Something went wrong on our side...";

/// Message returned when the task queue rejects a submission.
const QUEUE_FULL_MESSAGE: &str = "The task queue is currently full. Try again later.";

/// All errors that can surface from a glimpse-server request.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the caption task runtime.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The synchronous caption path failed inside the backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// An unclassified internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Caller errors carry their message through unchanged.
            ServerError::BadRequest(message) => {
                debug!(%message, "bad request rejected");
                (StatusCode::BAD_REQUEST, message.clone())
            }

            ServerError::Runtime(RuntimeError::TaskNotFound { task_id }) => {
                debug!(%task_id, "unknown task queried");
                (StatusCode::NOT_FOUND, "Task not found".to_owned())
            }

            // Saturation is expected under load; callers should retry later.
            ServerError::Runtime(RuntimeError::QueueFull { capacity }) => {
                warn!(capacity, "task queue full, submission rejected");
                (StatusCode::TOO_MANY_REQUESTS, QUEUE_FULL_MESSAGE.to_owned())
            }

            // Server faults: log the detail, answer with the generic message.
            ServerError::Backend(message) => {
                error!(%message, "caption backend error");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_owned())
            }
            ServerError::Internal(message) => {
                error!(%message, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_owned())
            }
        };

        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

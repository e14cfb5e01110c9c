//! Liveness endpoint.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ping", get(ping))
}

/// Heartbeat (`GET /ping`).
///
/// Always answers `{"status": "ok"}`; load balancers and monitors poll this.
async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

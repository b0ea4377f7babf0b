use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::core::jobs::{CancelOutcome, JobKind};
use crate::interfaces::web::AppState;

/// POST /api/jobs/{kind} with an optional JSON payload. Unknown kinds are a
/// client error; the closed kind set is the whole API.
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    payload: Option<Json<Value>>,
) -> impl IntoResponse {
    let Some(kind) = JobKind::from_kind(&kind) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown job kind '{}'", kind) })),
        )
            .into_response();
    };
    let payload = payload.map(|Json(v)| v).unwrap_or(Value::Null);
    match state.queue.enqueue(kind, payload).await {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "id": id, "kind": kind.as_str(), "status": "queued" })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/jobs/{id}
pub async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid job id" })),
        )
            .into_response();
    };
    match state.queue.status(id).await {
        Ok(job) => Json(job).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("job not found: {}", id) })),
        )
            .into_response(),
    }
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid job id" })),
        )
            .into_response();
    };
    match state.queue.cancel(id).await {
        Ok(CancelOutcome::Cancelled) => Json(json!({ "outcome": "cancelled" })).into_response(),
        Ok(CancelOutcome::AlreadyTerminal) => {
            Json(json!({ "outcome": "already_terminal" })).into_response()
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("job not found: {}", id) })),
        )
            .into_response(),
    }
}

fn internal_error(e: anyhow::Error) -> axum::response::Response {
    tracing::error!("Job endpoint failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::interfaces::web::AppState;

/// GET /api/interviews/active. `interview` is null when nothing is pending.
pub async fn active_interview(State(state): State<AppState>) -> impl IntoResponse {
    match state.interviews.pending().await {
        Ok(pending) => Json(json!({ "interview": pending })).into_response(),
        Err(e) => {
            tracing::error!("Interview lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

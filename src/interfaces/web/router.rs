use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{interviews, jobs, ws};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(super::health_endpoint))
        .route("/ws", get(ws::ws_endpoint))
        // One pattern serves both: POST takes a job kind, GET takes a job id.
        .route("/api/jobs/{key}", post(jobs::trigger_job).get(jobs::job_status))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/api/interviews/active", get(interviews::active_interview))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    response::sse::{Event, Sse},
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::info;

use crate::core::bus::NotificationBus;
use crate::core::gateway::GenerationGateway;
use crate::core::interview::InterviewScheduler;
use crate::core::jobs::JobQueue;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::router::Router as EventRouter;

pub struct ApiServer {
    state: AppState,
    api_host: String,
    api_port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) events: Arc<EventRouter>,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) bus: Arc<NotificationBus>,
    pub(crate) interviews: Arc<InterviewScheduler>,
    pub(crate) gateway: Arc<GenerationGateway>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

pub struct ApiServerConfig {
    pub events: Arc<EventRouter>,
    pub queue: Arc<JobQueue>,
    pub bus: Arc<NotificationBus>,
    pub interviews: Arc<InterviewScheduler>,
    pub gateway: Arc<GenerationGateway>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                events: config.events,
                queue: config.queue,
                bus: config.bus,
                interviews: config.interviews,
                gateway: config.gateway,
                log_tx: config.log_tx,
                api_port: config.api_port,
            },
            api_host: config.api_host,
            api_port: config.api_port,
        }
    }
}

// --- Shared endpoints (used by router) ---

async fn health_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let degraded = state.gateway.is_degraded().await;
    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "connections": state.bus.connection_count().await,
    }))
}

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });
    Sse::new(stream)
}

// --- Lifecycle ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let state = self.state.clone();
        let addr = format!("{}:{}", self.api_host, self.api_port);

        tokio::spawn(async move {
            let app = router::build_api_router(state);
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("API server running at http://{addr}");
                    if let Err(e) = axum::serve(listener, app).await {
                        tracing::error!("API server crashed: {}", e);
                    }
                }
                Err(e) => tracing::error!("API server could not bind {}: {}", addr, e),
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API server shutting down...");
        Ok(())
    }
}

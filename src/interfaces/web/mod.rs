mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::core::manager::AgentManager;


pub struct ApiServer {
    manager: AgentManager,
    log_tx: broadcast::Sender<String>,
    api_host: String,
    api_port: u16,
}

pub struct ApiServerConfig {
    pub manager: AgentManager,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) manager: AgentManager,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            manager: config.manager,
            log_tx: config.log_tx,
            api_host: config.api_host,
            api_port: config.api_port,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind API server to {addr}"))?;

        let state = AppState {
            manager: self.manager.clone(),
            log_tx: self.log_tx.clone(),
            api_port: self.api_port,
        };
        let app = router::build_api_router(state);

        tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        Ok(())
    }
}

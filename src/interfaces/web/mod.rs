mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use std::convert::Infallible;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::core::jobs::JobStatusStore;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::service::ProcessingService;

#[derive(Clone)]
pub struct AppState {
    pub service: ProcessingService,
    pub jobs: JobStatusStore,
    pub log_tx: broadcast::Sender<String>,
}

pub struct ApiServerConfig {
    pub service: ProcessingService,
    pub jobs: JobStatusStore,
    pub log_tx: broadcast::Sender<String>,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

pub struct ApiServer {
    config: Option<ApiServerConfig>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            config: Some(config),
            handle: None,
        }
    }
}

// --- SSE Logs (used by router) ---

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

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let Some(config) = self.config.take() else {
            return Ok(());
        };
        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {}", addr))?;

        let state = AppState {
            service: config.service,
            jobs: config.jobs,
            log_tx: config.log_tx,
        };
        let app = router::build_api_router(state, &config.cors_origins);

        info!("API server running at http://{}", addr);
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API server shutting down...");
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

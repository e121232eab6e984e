use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use pmbuddy_agent::Workflow;
use pmbuddy_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;
use crate::static_files;

/// HTTP server exposing one workflow as a runnable entity.
pub struct GatewayServer {
    config: GatewayConfig,
    workflow: Arc<Workflow>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, workflow: Arc<Workflow>) -> Self {
        Self { config, workflow }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            workflow: self.workflow.clone(),
        });

        Router::new()
            .route("/api/health", get(routes::health))
            .route("/v1/entities", get(routes::list_entities))
            .route("/v1/entities/{id}/run", post(routes::run_entity))
            // Embedded Web UI
            .route("/", get(static_files::index))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!(bind = %addr, workflow = %self.workflow.name(), "Gateway listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use medrag_agent::RagGraph;
use medrag_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway in front of the conversation graph.
pub struct GatewayServer {
    config: GatewayConfig,
    graph: Arc<RagGraph>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, graph: Arc<RagGraph>) -> Self {
        Self { config, graph }
    }

    /// The axum router with all routes and layers attached.
    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            graph: self.graph.clone(),
        });

        Router::new()
            .route("/api/health", get(routes::health))
            .route("/api/query", post(routes::query))
            .route(
                "/api/conversations/{id}/history",
                get(routes::conversation_history),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

use std::sync::Arc;

use medrag_agent::RagGraph;
use medrag_core::config::GatewayConfig;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub graph: Arc<RagGraph>,
}

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use medrag_agent::TurnOutcome;
use medrag_core::error::RagError;
use medrag_core::types::ConversationId;

use crate::error::ApiError;
use crate::middleware::Authenticated;
use crate::state::AppState;

// GET /api/health, no auth required
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
pub struct QueryBody {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub text: String,
}

// POST /api/query
pub async fn query(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let Json(body) = body.map_err(|e| RagError::InvalidInput(e.body_text()))?;

    let conversation_id = body
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .map(|id| ConversationId::from_string(id.trim()))
        .unwrap_or_else(ConversationId::new);

    info!(conversation_id = %conversation_id, "Query received");
    let outcome = state.graph.invoke(&conversation_id, &body.text).await?;
    Ok(Json(outcome))
}

// GET /api/conversations/{id}/history
pub async fn conversation_history(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation_id = ConversationId::from_string(&id);
    let turns = state.graph.history(&conversation_id).await?;
    Ok(Json(serde_json::json!({
        "conversation_id": conversation_id,
        "turns": turns,
    })))
}

//! Session resource: send-message-to-session and conversation history reads
//! (spec.md §4.10).

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use orchestrator_core::storage::TurnWithChildren;

use crate::error::AppError;
use crate::types::SendMessageRequest;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/messages", post(send_message))
        .route("/:id/history", get(get_history))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.orchestrator.send_message_to_session(&id, &body.message).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TurnWithChildren>>, AppError> {
    Ok(Json(state.repositories.conversation.get_history(&id)?))
}

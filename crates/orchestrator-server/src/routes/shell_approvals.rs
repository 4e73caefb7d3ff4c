//! Human-in-the-loop resolution for pending `shell` tool approvals
//! (spec.md §4.2). The decision itself is delivered out of band (a UI
//! action); this route is where it lands.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use orchestrator_core::shell_approval::ApprovalDecision;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:workflow_id/:tool_call_id", post(resolve))
}

#[derive(Debug, Deserialize)]
struct ResolveApprovalRequest {
    approved: bool,
    deny_reason: Option<String>,
    #[serde(default)]
    remember: bool,
}

async fn resolve(
    State(state): State<AppState>,
    Path((workflow_id, tool_call_id)): Path<(String, String)>,
    Json(body): Json<ResolveApprovalRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resolved = state
        .shell_approval
        .resolve(
            &workflow_id,
            &tool_call_id,
            ApprovalDecision {
                approved: body.approved,
                deny_reason: body.deny_reason,
                remember: body.remember,
            },
        )
        .await;

    if !resolved {
        return Err(AppError::NotFound(format!(
            "no pending shell approval {} for workflow {}",
            tool_call_id, workflow_id
        )));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

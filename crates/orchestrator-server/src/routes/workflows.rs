//! Workflow resource: create, list/get, approve, request-changes,
//! retry-pulse, and read-only artifact/pulse lookups (spec.md §4.10).

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use orchestrator_core::git_worktree::MergeStrategy;
use orchestrator_core::workflow_orchestrator::ApproveOptions;

use crate::error::AppError;
use crate::types::{
    ApproveArtifactRequest, ApproveOutcomeResponse, CreateWorkflowFromPromptRequest,
    CreateWorkflowRequest, RequestChangesRequest, WorkflowResponse,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_workflow).get(list_workflows))
        .route("/from-prompt", post(create_workflow_from_prompt))
        .route("/:id", get(get_workflow))
        .route("/:id/approve", post(approve_artifact))
        .route("/:id/request-changes", post(request_changes))
        .route("/:id/retry-pulse", post(retry_pulse))
        .route("/:id/scope-card", get(get_scope_card))
        .route("/:id/research-card", get(get_research_card))
        .route("/:id/plan", get(get_plan))
        .route("/:id/review-card", get(get_review_card))
        .route("/:id/pulses", get(list_pulses))
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, AppError> {
    let workflow = state
        .orchestrator
        .create_workflow(body.title, body.description, body.priority)
        .await?;
    Ok(Json(workflow.into()))
}

async fn create_workflow_from_prompt(
    State(state): State<AppState>,
    Json(body): Json<CreateWorkflowFromPromptRequest>,
) -> Result<Json<WorkflowResponse>, AppError> {
    let workflow = state
        .orchestrator
        .create_workflow_from_prompt(&body.prompt, body.priority)
        .await?;
    Ok(Json(workflow.into()))
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<Vec<WorkflowResponse>>, AppError> {
    let workflows = state.repositories.workflows.list_all()?;
    Ok(Json(workflows.into_iter().map(WorkflowResponse::from).collect()))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, AppError> {
    let workflow = state
        .repositories
        .workflows
        .get_by_id(&id)?
        .ok_or_else(|| AppError::NotFound(format!("workflow {} not found", id)))?;
    Ok(Json(workflow.into()))
}

async fn approve_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApproveArtifactRequest>,
) -> Result<Json<ApproveOutcomeResponse>, AppError> {
    let merge_strategy = body
        .merge_strategy
        .as_deref()
        .map(|s| {
            MergeStrategy::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown merge strategy: {}", s)))
        })
        .transpose()?;

    let options = ApproveOptions {
        path: body.path,
        merge_strategy,
        commit_message: body.commit_message,
    };

    let outcome = state.orchestrator.approve_artifact(&id, options).await?;
    Ok(Json(outcome.into()))
}

async fn request_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RequestChangesRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.orchestrator.request_changes(&id, &body.feedback).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn retry_pulse(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.orchestrator.retry_pulse(&id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn get_scope_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<orchestrator_core::data::ScopeCard>>, AppError> {
    Ok(Json(state.repositories.artifacts.get_latest_scope_card(&id)?))
}

async fn get_research_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<orchestrator_core::data::ResearchCard>>, AppError> {
    Ok(Json(state.repositories.artifacts.get_latest_research_card(&id)?))
}

async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<orchestrator_core::data::Plan>>, AppError> {
    Ok(Json(state.repositories.artifacts.get_latest_plan(&id)?))
}

async fn get_review_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<orchestrator_core::data::ReviewCard>>, AppError> {
    Ok(Json(state.repositories.artifacts.get_latest_review_card(&id)?))
}

async fn list_pulses(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<orchestrator_core::data::Pulse>>, AppError> {
    Ok(Json(state.repositories.pulses.get_pulses_for_workflow(&id)?))
}

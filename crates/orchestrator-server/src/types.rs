//! Wire DTOs for the collaborator contract (spec.md §4.10). Kept separate
//! from `orchestrator_core::data` so the HTTP wire shape can evolve (e.g.
//! camelCase renames for a JS client) without touching the core's own
//! serde derives.

use orchestrator_core::{
    data::{Priority, ScopePath, Workflow, WorkflowStatus},
    workflow_orchestrator::ApproveOutcome,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowFromPromptRequest {
    pub prompt: String,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct ApproveArtifactRequest {
    /// Only meaningful when approving a `scope_card`.
    pub path: Option<ScopePath>,
    /// Only meaningful when approving a `review_card`.
    pub merge_strategy: Option<String>,
    pub commit_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequestChangesRequest {
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: WorkflowStatus,
    pub current_session_id: Option<String>,
    pub awaiting_approval: bool,
    pub base_branch: String,
}

impl From<Workflow> for WorkflowResponse {
    fn from(workflow: Workflow) -> Self {
        Self {
            id: workflow.id,
            title: workflow.title,
            description: workflow.description,
            priority: workflow.priority,
            status: workflow.status,
            current_session_id: workflow.current_session_id,
            awaiting_approval: workflow.awaiting_approval,
            base_branch: workflow.base_branch,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApproveOutcomeResponse {
    pub stage: WorkflowStatus,
    pub merge_commit_sha: Option<String>,
}

impl From<ApproveOutcome> for ApproveOutcomeResponse {
    fn from(outcome: ApproveOutcome) -> Self {
        Self { stage: outcome.stage, merge_commit_sha: outcome.merge_commit_sha }
    }
}

//! Typed error enums for the workflow/pulse state machines and the
//! approval gate. Tool-level errors stay as the JSON envelope `ToolResult`
//! already encodes; these are for orchestrator-level failures that a
//! caller (the HTTP layer, a test) needs to match on by kind.
//!
//! Grounded on krusty-core's sprinkling of `#[derive(thiserror::Error)]`
//! enums at major seams (e.g. `ApprovalCancelled` in `shell_approval.rs`)
//! rather than a single catch-all error type.

pub use crate::shell_approval::ApprovalCancelled;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow {0} not found")]
    NotFound(String),

    #[error("workflow {workflow_id} is in stage {current:?} and cannot transition to {attempted:?}")]
    InvalidTransition {
        workflow_id: String,
        current: crate::data::WorkflowStatus,
        attempted: crate::data::WorkflowStatus,
    },

    #[error("workflow {workflow_id} is not awaiting approval")]
    NotAwaitingApproval { workflow_id: String },

    #[error("workflow {workflow_id} already has an active session {session_id}")]
    SessionAlreadyActive { workflow_id: String, session_id: String },

    #[error("workflow {0} has no running pulse")]
    NoRunningPulse(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("git command failed: {0}")]
    GitCommandFailed(String),

    #[error("merge conflict in worktree for pulse {pulse_id}: {detail}")]
    Conflict { pulse_id: String, detail: String },

    #[error("no worktree recorded for pulse {0}")]
    NoWorktree(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Cancelled(#[from] ApprovalCancelled),

    #[error("no pending approval request for tool call {0}")]
    NoPendingRequest(String),
}

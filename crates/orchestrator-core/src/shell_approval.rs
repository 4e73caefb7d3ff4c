//! Shell approval service: process-wide, workflow-scoped gate on shell
//! tool calls.
//!
//! Grounded on krusty-server's `PendingApprovals` pattern in
//! `routes/chat.rs` (`Arc<RwLock<HashMap<String, oneshot::Sender<bool>>>>`),
//! generalized to carry a deny reason and a per-workflow remembered-command
//! set, and moved into the orchestration core so it is reachable from the
//! tool layer directly rather than only from the HTTP route handler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};

/// Outcome of a resolved approval request.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub deny_reason: Option<String>,
    pub remember: bool,
}

#[derive(Debug)]
pub struct ApprovalRequest {
    pub workflow_id: String,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub tool_call_id: String,
    pub command: String,
    pub reason: Option<String>,
}

struct Pending {
    tx: oneshot::Sender<ApprovalDecision>,
}

#[derive(Default)]
struct WorkflowState {
    remembered_commands: HashSet<String>,
    pending: HashMap<String, Pending>,
}

/// Error returned to a caller whose approval request was abandoned by a
/// workflow cleanup rather than resolved by a user decision.
#[derive(Debug, thiserror::Error)]
#[error("shell approval request for workflow {workflow_id} was cancelled: {reason}")]
pub struct ApprovalCancelled {
    pub workflow_id: String,
    pub reason: String,
}

/// Process-wide approval gate, keyed by workflow id. One instance is shared
/// across every running workflow via `Arc`.
#[derive(Clone, Default)]
pub struct ShellApprovalService {
    state: Arc<RwLock<HashMap<String, WorkflowState>>>,
}

impl ShellApprovalService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_command_remembered(&self, workflow_id: &str, command: &str) -> bool {
        let state = self.state.read().await;
        state
            .get(workflow_id)
            .map(|w| w.remembered_commands.contains(command))
            .unwrap_or(false)
    }

    /// Register a pending request and suspend until a decision arrives via
    /// `resolve`, or until `cleanup_workflow` rejects it.
    pub async fn request_approval(
        &self,
        request: ApprovalRequest,
    ) -> Result<ApprovalDecision, ApprovalCancelled> {
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.write().await;
            let workflow_state = state.entry(request.workflow_id.clone()).or_default();
            workflow_state
                .pending
                .insert(request.tool_call_id.clone(), Pending { tx });
        }

        tracing::info!(
            workflow_id = %request.workflow_id,
            tool_call_id = %request.tool_call_id,
            command = %request.command,
            "shell command awaiting approval"
        );

        match rx.await {
            Ok(decision) => {
                if decision.approved && decision.remember {
                    let mut state = self.state.write().await;
                    state
                        .entry(request.workflow_id.clone())
                        .or_default()
                        .remembered_commands
                        .insert(request.command.clone());
                }
                Ok(decision)
            }
            Err(_) => Err(ApprovalCancelled {
                workflow_id: request.workflow_id,
                reason: "approval channel closed before a decision was made".to_string(),
            }),
        }
    }

    /// Deliver a user decision for a specific pending request. Returns
    /// `false` if no such request is pending (already resolved or unknown).
    pub async fn resolve(&self, workflow_id: &str, tool_call_id: &str, decision: ApprovalDecision) -> bool {
        let mut state = self.state.write().await;
        let Some(workflow_state) = state.get_mut(workflow_id) else {
            return false;
        };
        match workflow_state.pending.remove(tool_call_id) {
            Some(pending) => pending.tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// Reject every request pending for a workflow, e.g. when the workflow
    /// is abandoned. Every unresolved request is guaranteed to be either
    /// resolved here or by a prior `resolve` call — none are left dangling.
    pub async fn cleanup_workflow(&self, workflow_id: &str) {
        let mut state = self.state.write().await;
        if let Some(mut workflow_state) = state.remove(workflow_id) {
            for (_, pending) in workflow_state.pending.drain() {
                let _ = pending.tx.send(ApprovalDecision {
                    approved: false,
                    deny_reason: Some("workflow was cleaned up".to_string()),
                    remember: false,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workflow_id: &str, tool_call_id: &str) -> ApprovalRequest {
        ApprovalRequest {
            workflow_id: workflow_id.to_string(),
            session_id: "sess-1".to_string(),
            turn_id: None,
            tool_call_id: tool_call_id.to_string(),
            command: "cargo test".to_string(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn resolve_unblocks_the_waiting_request() {
        let service = ShellApprovalService::new();
        let service2 = service.clone();

        let handle = tokio::spawn(async move { service2.request_approval(request("wf-1", "tc-1")).await });

        tokio::task::yield_now().await;
        let resolved = service
            .resolve(
                "wf-1",
                "tc-1",
                ApprovalDecision {
                    approved: true,
                    deny_reason: None,
                    remember: true,
                },
            )
            .await;
        assert!(resolved);

        let decision = handle.await.unwrap().unwrap();
        assert!(decision.approved);
        assert!(service.is_command_remembered("wf-1", "cargo test").await);
    }

    #[tokio::test]
    async fn cleanup_rejects_all_pending_requests() {
        let service = ShellApprovalService::new();
        let service2 = service.clone();

        let handle = tokio::spawn(async move { service2.request_approval(request("wf-1", "tc-1")).await });

        tokio::task::yield_now().await;
        service.cleanup_workflow("wf-1").await;

        let decision = handle.await.unwrap().unwrap();
        assert!(!decision.approved);
        assert!(decision.deny_reason.is_some());
    }

    #[tokio::test]
    async fn resolve_on_unknown_request_returns_false() {
        let service = ShellApprovalService::new();
        let resolved = service
            .resolve(
                "wf-x",
                "tc-x",
                ApprovalDecision {
                    approved: true,
                    deny_reason: None,
                    remember: false,
                },
            )
            .await;
        assert!(!resolved);
    }
}

//! Workflow entity and the stage state machine's closed value sets.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority a workflow was created with. Informational only — does not
/// affect scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// The workflow's position in the stage pipeline.
///
/// `STAGE_TRANSITIONS`: backlog -> scoping -> researching -> planning
/// -> in_progress -> review -> done. `done` has no successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Backlog,
    Scoping,
    Researching,
    Planning,
    InProgress,
    Review,
    Done,
}

impl WorkflowStatus {
    /// The stage this one transitions to on normal advancement, or `None`
    /// if this is `done` (terminal) or `backlog` (only entered at creation,
    /// never advanced into — workflows are created directly into `scoping`).
    pub fn next(self) -> Option<WorkflowStatus> {
        match self {
            WorkflowStatus::Backlog => Some(WorkflowStatus::Scoping),
            WorkflowStatus::Scoping => Some(WorkflowStatus::Researching),
            WorkflowStatus::Researching => Some(WorkflowStatus::Planning),
            WorkflowStatus::Planning => Some(WorkflowStatus::InProgress),
            WorkflowStatus::InProgress => Some(WorkflowStatus::Review),
            WorkflowStatus::Review => Some(WorkflowStatus::Done),
            WorkflowStatus::Done => None,
        }
    }

    /// The agent role that owns a session in this stage, if any.
    /// `in_progress` is owned by the `Preflight` role until the first pulse
    /// starts an `Execution` session; `done` has no session.
    pub fn owning_role(self) -> Option<AgentRoleForStage> {
        match self {
            WorkflowStatus::Scoping => Some(AgentRoleForStage::Scoping),
            WorkflowStatus::Researching => Some(AgentRoleForStage::Research),
            WorkflowStatus::Planning => Some(AgentRoleForStage::Planning),
            WorkflowStatus::InProgress => Some(AgentRoleForStage::Preflight),
            WorkflowStatus::Review => Some(AgentRoleForStage::Review),
            WorkflowStatus::Backlog | WorkflowStatus::Done => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Backlog => "backlog",
            WorkflowStatus::Scoping => "scoping",
            WorkflowStatus::Researching => "researching",
            WorkflowStatus::Planning => "planning",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Review => "review",
            WorkflowStatus::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<WorkflowStatus> {
        Some(match s {
            "backlog" => WorkflowStatus::Backlog,
            "scoping" => WorkflowStatus::Scoping,
            "researching" => WorkflowStatus::Researching,
            "planning" => WorkflowStatus::Planning,
            "in_progress" => WorkflowStatus::InProgress,
            "review" => WorkflowStatus::Review,
            "done" => WorkflowStatus::Done,
            _ => return None,
        })
    }
}

/// Thin re-export to avoid a circular import between `workflow` and
/// `session` for the one place a stage needs to name the role it owns.
pub type AgentRoleForStage = crate::data::AgentRole;

/// The kind of artifact a workflow is waiting for human approval on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingArtifactType {
    ScopeCard,
    Research,
    Plan,
    ReviewCard,
    None,
}

/// A stateful job tracked through the stage pipeline.
///
/// Invariants (spec.md §3):
/// 1. At most one active session at a time (enforced by the session manager).
/// 2. `awaiting_approval = true` implies `status` is one of {scoping,
///    researching, planning, review} and `pending_artifact_type` is set.
/// 3. `status = done` implies `current_session_id` is `None` and
///    `awaiting_approval` is `false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: WorkflowStatus,
    pub current_session_id: Option<String>,
    pub awaiting_approval: bool,
    pub pending_artifact_type: PendingArtifactType,
    pub skipped_stages: BTreeSet<String>,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(title: impl Into<String>, description: Option<String>, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description,
            priority,
            status: WorkflowStatus::Scoping,
            current_session_id: None,
            awaiting_approval: false,
            pending_artifact_type: PendingArtifactType::None,
            skipped_stages: BTreeSet::new(),
            base_branch: "main".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the invariants named in spec.md §3. Used by tests and by the
    /// repository layer after every write as a cheap sanity assertion.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.awaiting_approval {
            let ok_stage = matches!(
                self.status,
                WorkflowStatus::Scoping
                    | WorkflowStatus::Researching
                    | WorkflowStatus::Planning
                    | WorkflowStatus::Review
            );
            if !ok_stage {
                return Err(format!(
                    "awaiting_approval=true but status={:?} is not an approval-gated stage",
                    self.status
                ));
            }
            if matches!(self.pending_artifact_type, PendingArtifactType::None) {
                return Err("awaiting_approval=true but pending_artifact_type is None".to_string());
            }
        }

        if self.status == WorkflowStatus::Done {
            if self.current_session_id.is_some() {
                return Err("status=done but current_session_id is set".to_string());
            }
            if self.awaiting_approval {
                return Err("status=done but awaiting_approval=true".to_string());
            }
        }

        Ok(())
    }
}

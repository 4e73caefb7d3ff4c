//! Workflow persistence.
//!
//! Grounded on krusty-core's `storage::sessions::SessionManager` — a thin
//! CRUD struct wrapping a `Database` handle, one method per operation,
//! `rusqlite::params!` for binding.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::data::{PendingArtifactType, Priority, Workflow, WorkflowStatus};

use super::Database;

/// Repository contract for workflow persistence (spec.md §4.4).
///
/// All operations are idempotent with respect to their identifying key;
/// status updates are monotonic where the state machine requires it.
pub trait WorkflowRepository: Send + Sync {
    fn create(&self, workflow: &Workflow) -> Result<()>;
    fn get_by_id(&self, id: &str) -> Result<Option<Workflow>>;
    /// Every workflow, most recently created first. Used by the list-reads
    /// side of the HTTP collaborator contract; never called from inside a
    /// mutating path.
    fn list_all(&self) -> Result<Vec<Workflow>>;
    fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<()>;
    fn set_current_session(&self, id: &str, session_id: Option<&str>) -> Result<()>;
    fn set_awaiting_approval(
        &self,
        id: &str,
        pending_artifact_type: PendingArtifactType,
    ) -> Result<()>;
    fn clear_awaiting_approval(&self, id: &str) -> Result<()>;
    /// Persist a stage transition and the session that now owns it (or
    /// `None` when transitioning into `done`) as a single logical update.
    fn transition_stage(
        &self,
        id: &str,
        new_status: WorkflowStatus,
        new_session_id: Option<&str>,
    ) -> Result<()>;
    fn set_base_branch(&self, id: &str, base_branch: &str) -> Result<()>;
    fn set_skipped_stages(&self, id: &str, stages: &BTreeSet<String>) -> Result<()>;
}

pub struct SqliteWorkflowRepository {
    db: Database,
}

impl SqliteWorkflowRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn row_to_workflow(row: &rusqlite::Row) -> rusqlite::Result<Workflow> {
        let priority: String = row.get("priority")?;
        let status: String = row.get("status")?;
        let pending_artifact_type: String = row.get("pending_artifact_type")?;
        let skipped_stages_json: String = row.get("skipped_stages")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Workflow {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            priority: parse_priority(&priority),
            status: WorkflowStatus::from_str(&status).unwrap_or(WorkflowStatus::Backlog),
            current_session_id: row.get("current_session_id")?,
            awaiting_approval: row.get::<_, i64>("awaiting_approval")? != 0,
            pending_artifact_type: parse_pending_artifact_type(&pending_artifact_type),
            skipped_stages: serde_json::from_str(&skipped_stages_json).unwrap_or_default(),
            base_branch: row.get("base_branch")?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

fn parse_priority(s: &str) -> Priority {
    match s {
        "low" => Priority::Low,
        "high" => Priority::High,
        "urgent" => Priority::Urgent,
        _ => Priority::Medium,
    }
}

fn priority_str(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
        Priority::Urgent => "urgent",
    }
}

fn parse_pending_artifact_type(s: &str) -> PendingArtifactType {
    match s {
        "scope_card" => PendingArtifactType::ScopeCard,
        "research" => PendingArtifactType::Research,
        "plan" => PendingArtifactType::Plan,
        "review_card" => PendingArtifactType::ReviewCard,
        _ => PendingArtifactType::None,
    }
}

fn pending_artifact_type_str(t: PendingArtifactType) -> &'static str {
    match t {
        PendingArtifactType::ScopeCard => "scope_card",
        PendingArtifactType::Research => "research",
        PendingArtifactType::Plan => "plan",
        PendingArtifactType::ReviewCard => "review_card",
        PendingArtifactType::None => "none",
    }
}

impl WorkflowRepository for SqliteWorkflowRepository {
    fn create(&self, workflow: &Workflow) -> Result<()> {
        let skipped_stages_json = serde_json::to_string(&workflow.skipped_stages)?;
        self.db.conn().execute(
            "INSERT INTO workflows (id, title, description, priority, status, current_session_id,
                awaiting_approval, pending_artifact_type, skipped_stages, base_branch, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                workflow.id,
                workflow.title,
                workflow.description,
                priority_str(workflow.priority),
                workflow.status.as_str(),
                workflow.current_session_id,
                workflow.awaiting_approval as i64,
                pending_artifact_type_str(workflow.pending_artifact_type),
                skipped_stages_json,
                workflow.base_branch,
                workflow.created_at.to_rfc3339(),
                workflow.updated_at.to_rfc3339(),
            ],
        )?;
        tracing::info!(workflow_id = %workflow.id, "workflow created");
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Workflow>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM workflows WHERE id = ?1",
                params![id],
                Self::row_to_workflow,
            )
            .optional()
            .context("querying workflow by id")
    }

    fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE workflows SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, id],
        )?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Workflow>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT * FROM workflows ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map([], Self::row_to_workflow)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("listing workflows")?;
        Ok(rows)
    }

    fn set_current_session(&self, id: &str, session_id: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE workflows SET current_session_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![session_id, now, id],
        )?;
        Ok(())
    }

    fn set_awaiting_approval(
        &self,
        id: &str,
        pending_artifact_type: PendingArtifactType,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE workflows SET awaiting_approval = 1, pending_artifact_type = ?1, updated_at = ?2 WHERE id = ?3",
            params![pending_artifact_type_str(pending_artifact_type), now, id],
        )?;
        Ok(())
    }

    fn clear_awaiting_approval(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE workflows SET awaiting_approval = 0, pending_artifact_type = 'none', updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    fn transition_stage(
        &self,
        id: &str,
        new_status: WorkflowStatus,
        new_session_id: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE workflows SET status = ?1, current_session_id = ?2, awaiting_approval = 0,
                pending_artifact_type = 'none', updated_at = ?3 WHERE id = ?4",
            params![new_status.as_str(), new_session_id, now, id],
        )?;
        tracing::info!(workflow_id = %id, new_status = new_status.as_str(), "workflow stage transitioned");
        Ok(())
    }

    fn set_base_branch(&self, id: &str, base_branch: &str) -> Result<()> {
        self.db.conn().execute(
            "UPDATE workflows SET base_branch = ?1 WHERE id = ?2",
            params![base_branch, id],
        )?;
        Ok(())
    }

    fn set_skipped_stages(&self, id: &str, stages: &BTreeSet<String>) -> Result<()> {
        let json = serde_json::to_string(stages)?;
        self.db.conn().execute(
            "UPDATE workflows SET skipped_stages = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SqliteWorkflowRepository {
        SqliteWorkflowRepository::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn create_and_get_round_trips() {
        let repo = repo();
        let wf = Workflow::new("Add JWT auth", None, Priority::High);
        repo.create(&wf).unwrap();

        let fetched = repo.get_by_id(&wf.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Add JWT auth");
        assert_eq!(fetched.status, WorkflowStatus::Scoping);
        assert_eq!(fetched.priority, Priority::High);
    }

    #[test]
    fn transition_stage_clears_approval_gate() {
        let repo = repo();
        let wf = Workflow::new("x", None, Priority::Medium);
        repo.create(&wf).unwrap();
        repo.set_awaiting_approval(&wf.id, PendingArtifactType::ScopeCard)
            .unwrap();

        repo.transition_stage(&wf.id, WorkflowStatus::Researching, Some("sess-1"))
            .unwrap();

        let fetched = repo.get_by_id(&wf.id).unwrap().unwrap();
        assert_eq!(fetched.status, WorkflowStatus::Researching);
        assert!(!fetched.awaiting_approval);
        assert_eq!(fetched.current_session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn list_all_returns_every_workflow() {
        let repo = repo();
        repo.create(&Workflow::new("first", None, Priority::Low)).unwrap();
        repo.create(&Workflow::new("second", None, Priority::Urgent)).unwrap();

        let all = repo.list_all().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn done_transition_has_no_session() {
        let repo = repo();
        let wf = Workflow::new("x", None, Priority::Medium);
        repo.create(&wf).unwrap();
        repo.transition_stage(&wf.id, WorkflowStatus::Done, None)
            .unwrap();

        let fetched = repo.get_by_id(&wf.id).unwrap().unwrap();
        assert_eq!(fetched.status, WorkflowStatus::Done);
        assert!(fetched.current_session_id.is_none());
        fetched.check_invariants().unwrap();
    }
}

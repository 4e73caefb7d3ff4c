//! Session persistence.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::data::{AgentRole, ContextType, Session, SessionStatus};

use super::Database;

/// Repository contract for session persistence (spec.md §4.4).
pub trait SessionRepository: Send + Sync {
    fn create(&self, session: &Session) -> Result<()>;
    fn update_status(&self, id: &str, status: SessionStatus) -> Result<()>;
    fn get_active_by_id(&self, id: &str) -> Result<Option<Session>>;
    fn get_by_id(&self, id: &str) -> Result<Option<Session>>;
    /// The active session row for a context, if any, read straight from
    /// storage rather than an in-memory index. Used to rehydrate
    /// `SessionManager` after a process restart (spec.md §4.6).
    fn get_active_by_context(&self, context_type: ContextType, context_id: &str) -> Result<Option<Session>>;
}

pub struct SqliteSessionRepository {
    db: Database,
}

impl SqliteSessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let context_type: String = row.get("context_type")?;
        let agent_role: String = row.get("agent_role")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;

        Ok(Session {
            id: row.get("id")?,
            context_type: parse_context_type(&context_type),
            context_id: row.get("context_id")?,
            agent_role: parse_agent_role(&agent_role),
            status: parse_session_status(&status),
            pulse_id: row.get("pulse_id")?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

fn parse_context_type(s: &str) -> ContextType {
    match s {
        "workflow" => ContextType::Workflow,
        _ => ContextType::Channel,
    }
}

fn parse_agent_role(s: &str) -> AgentRole {
    match s {
        "research" => AgentRole::Research,
        "planning" => AgentRole::Planning,
        "preflight" => AgentRole::Preflight,
        "execution" => AgentRole::Execution,
        "review" => AgentRole::Review,
        "discussion" => AgentRole::Discussion,
        _ => AgentRole::Scoping,
    }
}

fn parse_session_status(s: &str) -> SessionStatus {
    match s {
        "completed" => SessionStatus::Completed,
        "error" => SessionStatus::Error,
        _ => SessionStatus::Active,
    }
}

impl SessionRepository for SqliteSessionRepository {
    fn create(&self, session: &Session) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO sessions (id, context_type, context_id, agent_role, status, pulse_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.context_type.as_str(),
                session.context_id,
                session.agent_role.as_str(),
                status_str(session.status),
                session.pulse_id,
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        self.db.conn().execute(
            "UPDATE sessions SET status = ?1 WHERE id = ?2",
            params![status_str(status), id],
        )?;
        Ok(())
    }

    fn get_active_by_id(&self, id: &str) -> Result<Option<Session>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1 AND status = 'active'",
                params![id],
                Self::row_to_session,
            )
            .optional()
            .context("querying active session by id")
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id],
                Self::row_to_session,
            )
            .optional()
            .context("querying session by id")
    }

    fn get_active_by_context(&self, context_type: ContextType, context_id: &str) -> Result<Option<Session>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM sessions WHERE context_type = ?1 AND context_id = ?2 AND status = 'active'
                 ORDER BY created_at DESC LIMIT 1",
                params![context_type.as_str(), context_id],
                Self::row_to_session,
            )
            .optional()
            .context("querying active session by context")
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Completed => "completed",
        SessionStatus::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_active_session() {
        let repo = SqliteSessionRepository::new(Database::open_in_memory().unwrap());
        let session = Session::new(ContextType::Workflow, "wf-1", AgentRole::Scoping);
        repo.create(&session).unwrap();

        let fetched = repo.get_active_by_id(&session.id).unwrap().unwrap();
        assert_eq!(fetched.context_id, "wf-1");

        repo.update_status(&session.id, SessionStatus::Completed)
            .unwrap();
        assert!(repo.get_active_by_id(&session.id).unwrap().is_none());
    }

    #[test]
    fn get_active_by_context_finds_an_active_session_without_its_id() {
        let repo = SqliteSessionRepository::new(Database::open_in_memory().unwrap());
        let session = Session::new(ContextType::Workflow, "wf-1", AgentRole::Execution);
        repo.create(&session).unwrap();

        let found = repo
            .get_active_by_context(ContextType::Workflow, "wf-1")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, session.id);

        repo.update_status(&session.id, SessionStatus::Completed).unwrap();
        assert!(repo
            .get_active_by_context(ContextType::Workflow, "wf-1")
            .unwrap()
            .is_none());
    }
}

//! Shared SQLite connection handle.
//!
//! Grounded on krusty-core's `storage::Database`/`SharedDatabase` pattern:
//! a thin wrapper around a single `rusqlite::Connection` behind a mutex,
//! with schema creation run once via plain `CREATE TABLE IF NOT EXISTS`
//! statements (the teacher has no separate migration framework).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

/// A cloneable handle to a single SQLite connection, matching krusty-core's
/// `Database` (each clone shares the same underlying connection + mutex).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (creating if absent) the database at `path` and apply schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        db.apply_schema()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        };
        db.apply_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    fn apply_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    current_session_id TEXT,
    awaiting_approval INTEGER NOT NULL DEFAULT 0,
    pending_artifact_type TEXT NOT NULL DEFAULT 'none',
    skipped_stages TEXT NOT NULL DEFAULT '[]',
    base_branch TEXT NOT NULL DEFAULT 'main',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    context_type TEXT NOT NULL,
    context_id TEXT NOT NULL,
    agent_role TEXT NOT NULL,
    status TEXT NOT NULL,
    pulse_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_context ON sessions(context_type, context_id);

CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    turn_index INTEGER NOT NULL,
    role TEXT NOT NULL,
    status TEXT NOT NULL,
    hidden INTEGER NOT NULL DEFAULT 0,
    input_tokens INTEGER,
    output_tokens INTEGER,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE(session_id, turn_index)
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    turn_id TEXT NOT NULL,
    message_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE(turn_id, message_index)
);

CREATE TABLE IF NOT EXISTS thoughts (
    id TEXT PRIMARY KEY,
    turn_id TEXT NOT NULL,
    thought_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE(turn_id, thought_index)
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id TEXT PRIMARY KEY,
    turn_id TEXT NOT NULL,
    tool_index INTEGER NOT NULL,
    tool_name TEXT NOT NULL,
    reason TEXT,
    input TEXT NOT NULL,
    output TEXT,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    UNIQUE(turn_id, tool_index)
);

CREATE TABLE IF NOT EXISTS scope_cards (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    recommended_path TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS research_cards (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    findings TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    pulses_json TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS review_cards (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    recommendation TEXT,
    suggested_commit_message TEXT,
    diff TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS review_comments (
    id TEXT PRIMARY KEY,
    review_card_id TEXT NOT NULL,
    target TEXT NOT NULL,
    file_path TEXT,
    start_line INTEGER,
    end_line INTEGER,
    severity TEXT,
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pulses (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    planned_pulse_id TEXT NOT NULL,
    planned_index INTEGER NOT NULL,
    status TEXT NOT NULL,
    description TEXT NOT NULL,
    depends_on TEXT NOT NULL DEFAULT '[]',
    has_unresolved_issues INTEGER NOT NULL DEFAULT 0,
    is_recovery_checkpoint INTEGER NOT NULL DEFAULT 0,
    rejection_count INTEGER NOT NULL DEFAULT 0,
    failure_reason TEXT,
    worktree_path TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS preflight_setups (
    workflow_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS baselines (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    issue_type TEXT NOT NULL,
    source TEXT NOT NULL,
    pattern TEXT NOT NULL,
    file_path TEXT,
    description TEXT
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_applies_schema_idempotently() {
        let db = Database::open_in_memory().unwrap();
        db.apply_schema().unwrap();
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='workflows'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}

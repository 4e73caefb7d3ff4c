//! Conversation persistence: turns, messages, thoughts, tool calls.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use crate::data::{Message, Thought, ToolCall, ToolCallStatus, Turn, TurnRole, TurnStatus};

use super::Database;

/// A turn plus its children, returned by `get_history`/`load_session_context`.
#[derive(Debug, Clone, Serialize)]
pub struct TurnWithChildren {
    pub turn: Turn,
    pub messages: Vec<Message>,
    pub thoughts: Vec<Thought>,
    pub tool_calls: Vec<ToolCall>,
}

/// Repository contract for conversation persistence (spec.md §4.4).
pub trait ConversationRepository: Send + Sync {
    fn create_turn(&self, session_id: &str, role: TurnRole, hidden: bool) -> Result<Turn>;
    fn complete_turn(&self, turn_id: &str, input_tokens: Option<i64>, output_tokens: Option<i64>) -> Result<()>;
    fn error_turn(&self, turn_id: &str) -> Result<()>;

    fn save_message(&self, turn_id: &str, message_index: i64, text: &str) -> Result<Message>;
    fn save_thought(&self, turn_id: &str, thought_index: i64, text: &str) -> Result<Thought>;

    fn record_tool_start(
        &self,
        turn_id: &str,
        tool_index: i64,
        tool_name: &str,
        reason: Option<&str>,
        input: Value,
    ) -> Result<ToolCall>;
    fn record_tool_complete(
        &self,
        tool_call_id: &str,
        output: &str,
        status: ToolCallStatus,
    ) -> Result<()>;

    fn get_history(&self, session_id: &str) -> Result<Vec<TurnWithChildren>>;
    fn load_session_context(&self, session_id: &str) -> Result<Vec<TurnWithChildren>> {
        self.get_history(session_id)
    }
}

pub struct SqliteConversationRepository {
    db: Database,
}

impl SqliteConversationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn next_turn_index(&self, session_id: &str) -> Result<i64> {
        let max: Option<i64> = self.db.conn().query_row(
            "SELECT MAX(turn_index) FROM turns WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }

    fn row_to_turn(row: &rusqlite::Row) -> rusqlite::Result<Turn> {
        let role: String = row.get("role")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;

        Ok(Turn {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            turn_index: row.get("turn_index")?,
            role: if role == "assistant" {
                TurnRole::Assistant
            } else {
                TurnRole::User
            },
            status: match status.as_str() {
                "completed" => TurnStatus::Completed,
                "error" => TurnStatus::Error,
                _ => TurnStatus::Streaming,
            },
            hidden: row.get::<_, i64>("hidden")? != 0,
            input_tokens: row.get("input_tokens")?,
            output_tokens: row.get("output_tokens")?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            completed_at: completed_at.and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        })
    }

    fn row_to_tool_call(row: &rusqlite::Row) -> rusqlite::Result<ToolCall> {
        let input_json: String = row.get("input")?;
        let status: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let ended_at: Option<String> = row.get("ended_at")?;

        Ok(ToolCall {
            id: row.get("id")?,
            turn_id: row.get("turn_id")?,
            tool_index: row.get("tool_index")?,
            tool_name: row.get("tool_name")?,
            reason: row.get("reason")?,
            input: serde_json::from_str(&input_json).unwrap_or(Value::Null),
            output: row.get("output")?,
            status: match status.as_str() {
                "completed" => ToolCallStatus::Completed,
                "error" => ToolCallStatus::Error,
                _ => ToolCallStatus::Running,
            },
            started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            ended_at: ended_at.and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        })
    }
}

impl ConversationRepository for SqliteConversationRepository {
    fn create_turn(&self, session_id: &str, role: TurnRole, hidden: bool) -> Result<Turn> {
        let turn_index = self.next_turn_index(session_id)?;
        let turn = Turn {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            turn_index,
            role,
            status: TurnStatus::Streaming,
            hidden,
            input_tokens: None,
            output_tokens: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        self.db.conn().execute(
            "INSERT INTO turns (id, session_id, turn_index, role, status, hidden, input_tokens, output_tokens, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
            params![
                turn.id,
                turn.session_id,
                turn.turn_index,
                if role == TurnRole::Assistant { "assistant" } else { "user" },
                "streaming",
                turn.hidden as i64,
                turn.input_tokens,
                turn.output_tokens,
                turn.created_at.to_rfc3339(),
            ],
        )?;

        Ok(turn)
    }

    fn complete_turn(&self, turn_id: &str, input_tokens: Option<i64>, output_tokens: Option<i64>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE turns SET status = 'completed', completed_at = ?1, input_tokens = ?2, output_tokens = ?3 WHERE id = ?4",
            params![now, input_tokens, output_tokens, turn_id],
        )?;
        Ok(())
    }

    fn error_turn(&self, turn_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db.conn().execute(
            "UPDATE turns SET status = 'error', completed_at = ?1 WHERE id = ?2",
            params![now, turn_id],
        )?;
        Ok(())
    }

    fn save_message(&self, turn_id: &str, message_index: i64, text: &str) -> Result<Message> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            turn_id: turn_id.to_string(),
            message_index,
            text: text.to_string(),
        };
        self.db.conn().execute(
            "INSERT INTO messages (id, turn_id, message_index, text) VALUES (?1, ?2, ?3, ?4)",
            params![message.id, message.turn_id, message.message_index, message.text],
        )?;
        Ok(message)
    }

    fn save_thought(&self, turn_id: &str, thought_index: i64, text: &str) -> Result<Thought> {
        let thought = Thought {
            id: uuid::Uuid::new_v4().to_string(),
            turn_id: turn_id.to_string(),
            thought_index,
            text: text.to_string(),
        };
        self.db.conn().execute(
            "INSERT INTO thoughts (id, turn_id, thought_index, text) VALUES (?1, ?2, ?3, ?4)",
            params![thought.id, thought.turn_id, thought.thought_index, thought.text],
        )?;
        Ok(thought)
    }

    fn record_tool_start(
        &self,
        turn_id: &str,
        tool_index: i64,
        tool_name: &str,
        reason: Option<&str>,
        input: Value,
    ) -> Result<ToolCall> {
        let tool_call = ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            turn_id: turn_id.to_string(),
            tool_index,
            tool_name: tool_name.to_string(),
            reason: reason.map(|s| s.to_string()),
            input: input.clone(),
            output: None,
            status: ToolCallStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        };

        self.db.conn().execute(
            "INSERT INTO tool_calls (id, turn_id, tool_index, tool_name, reason, input, output, status, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 'running', ?7, NULL)",
            params![
                tool_call.id,
                tool_call.turn_id,
                tool_call.tool_index,
                tool_call.tool_name,
                tool_call.reason,
                input.to_string(),
                tool_call.started_at.to_rfc3339(),
            ],
        )?;

        Ok(tool_call)
    }

    fn record_tool_complete(
        &self,
        tool_call_id: &str,
        output: &str,
        status: ToolCallStatus,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let status_str = match status {
            ToolCallStatus::Completed => "completed",
            ToolCallStatus::Error => "error",
            ToolCallStatus::Running => "running",
        };
        self.db.conn().execute(
            "UPDATE tool_calls SET output = ?1, status = ?2, ended_at = ?3 WHERE id = ?4",
            params![output, status_str, now, tool_call_id],
        )?;
        Ok(())
    }

    fn get_history(&self, session_id: &str) -> Result<Vec<TurnWithChildren>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM turns WHERE session_id = ?1 ORDER BY turn_index ASC",
        )?;
        let turns: Vec<Turn> = stmt
            .query_map(params![session_id], Self::row_to_turn)?
            .collect::<rusqlite::Result<_>>()
            .context("loading turns")?;

        let mut out = Vec::with_capacity(turns.len());
        for turn in turns {
            let mut msg_stmt = conn.prepare(
                "SELECT * FROM messages WHERE turn_id = ?1 ORDER BY message_index ASC",
            )?;
            let messages: Vec<Message> = msg_stmt
                .query_map(params![turn.id], |row| {
                    Ok(Message {
                        id: row.get("id")?,
                        turn_id: row.get("turn_id")?,
                        message_index: row.get("message_index")?,
                        text: row.get("text")?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut thought_stmt = conn.prepare(
                "SELECT * FROM thoughts WHERE turn_id = ?1 ORDER BY thought_index ASC",
            )?;
            let thoughts: Vec<Thought> = thought_stmt
                .query_map(params![turn.id], |row| {
                    Ok(Thought {
                        id: row.get("id")?,
                        turn_id: row.get("turn_id")?,
                        thought_index: row.get("thought_index")?,
                        text: row.get("text")?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut tool_stmt = conn.prepare(
                "SELECT * FROM tool_calls WHERE turn_id = ?1 ORDER BY tool_index ASC",
            )?;
            let tool_calls: Vec<ToolCall> = tool_stmt
                .query_map(params![turn.id], Self::row_to_tool_call)?
                .collect::<rusqlite::Result<_>>()?;

            out.push(TurnWithChildren {
                turn,
                messages,
                thoughts,
                tool_calls,
            });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_index_is_strictly_increasing_per_session() {
        let repo = SqliteConversationRepository::new(Database::open_in_memory().unwrap());
        let t0 = repo.create_turn("sess-1", TurnRole::User, false).unwrap();
        let t1 = repo.create_turn("sess-1", TurnRole::Assistant, false).unwrap();
        assert_eq!(t0.turn_index, 0);
        assert_eq!(t1.turn_index, 1);
    }

    #[test]
    fn complete_turn_sets_completed_at() {
        let repo = SqliteConversationRepository::new(Database::open_in_memory().unwrap());
        let turn = repo.create_turn("sess-1", TurnRole::User, false).unwrap();
        repo.complete_turn(&turn.id, Some(10), Some(20)).unwrap();

        let history = repo.get_history("sess-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].turn.status, TurnStatus::Completed);
        assert!(history[0].turn.completed_at.is_some());
    }

    #[test]
    fn tool_call_lifecycle_round_trips() {
        let repo = SqliteConversationRepository::new(Database::open_in_memory().unwrap());
        let turn = repo.create_turn("sess-1", TurnRole::Assistant, false).unwrap();
        let tc = repo
            .record_tool_start(&turn.id, 0, "write_file", Some("create file"), serde_json::json!({"path": "a.rs"}))
            .unwrap();
        repo.record_tool_complete(&tc.id, "ok", ToolCallStatus::Completed)
            .unwrap();

        let history = repo.get_history("sess-1").unwrap();
        assert_eq!(history[0].tool_calls.len(), 1);
        assert_eq!(history[0].tool_calls[0].status, ToolCallStatus::Completed);
        assert_eq!(history[0].tool_calls[0].output.as_deref(), Some("ok"));
    }
}

//! Turn, Message, Thought, and ToolCall — the conversational record of a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Streaming,
    Completed,
    Error,
}

/// A single round in a session.
///
/// Invariant: `turn_index` is strictly increasing per session. A completed
/// turn has `completed_at` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub turn_index: i64,
    pub role: TurnRole,
    pub status: TurnStatus,
    pub hidden: bool,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A text segment within an assistant turn. Messages split on every tool
/// call, so segments are numbered 0..N within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub turn_id: String,
    pub message_index: i64,
    pub text: String,
}

/// An extended-thinking block within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub id: String,
    pub turn_id: String,
    pub thought_index: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Error,
}

/// A tool invocation within a turn.
///
/// Invariant: `message_index`, `thought_index`, `tool_index` are each
/// unique within their turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub turn_id: String,
    pub tool_index: i64,
    pub tool_name: String,
    pub reason: Option<String>,
    pub input: Value,
    pub output: Option<String>,
    pub status: ToolCallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

//! Session entity: one agent execution context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of context a session is bound to. `Channel` sessions are
/// ad-hoc (e.g. a discussion outside any workflow); `Workflow` sessions are
/// bound to a workflow's current stage or pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Channel,
    Workflow,
}

impl ContextType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextType::Channel => "channel",
            ContextType::Workflow => "workflow",
        }
    }
}

/// The persona/tool-subset/model-scenario a session runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Scoping,
    Research,
    Planning,
    Preflight,
    Execution,
    Review,
    Discussion,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Scoping => "scoping",
            AgentRole::Research => "research",
            AgentRole::Planning => "planning",
            AgentRole::Preflight => "preflight",
            AgentRole::Execution => "execution",
            AgentRole::Review => "review",
            AgentRole::Discussion => "discussion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
}

/// A single agent execution context.
///
/// Invariant: at most one active session per `(context_type, context_id)`.
/// Stopping a session aborts in-flight operations and is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub context_type: ContextType,
    pub context_id: String,
    pub agent_role: AgentRole,
    pub status: SessionStatus,
    pub pulse_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(context_type: ContextType, context_id: impl Into<String>, agent_role: AgentRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            context_type,
            context_id: context_id.into(),
            agent_role,
            status: SessionStatus::Active,
            pulse_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_pulse(mut self, pulse_id: impl Into<String>) -> Self {
        self.pulse_id = Some(pulse_id.into());
        self
    }

    pub fn context_key(&self) -> String {
        format!("{}:{}", self.context_type.as_str(), self.context_id)
    }
}

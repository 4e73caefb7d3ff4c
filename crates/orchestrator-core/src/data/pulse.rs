//! Pulse entity: one code-change unit inside the in_progress stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseStatus {
    Proposed,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

/// Invariant: at most one pulse per workflow in status=running; pulses
/// execute in `depends_on`-DAG topological order, ties broken by planned index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pulse {
    pub id: String,
    pub workflow_id: String,
    pub planned_pulse_id: String,
    pub planned_index: i64,
    pub status: PulseStatus,
    pub description: String,
    pub depends_on: Vec<String>,
    pub has_unresolved_issues: bool,
    pub is_recovery_checkpoint: bool,
    pub rejection_count: i64,
    pub failure_reason: Option<String>,
    pub worktree_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

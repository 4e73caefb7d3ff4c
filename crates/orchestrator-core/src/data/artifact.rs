//! The four artifact kinds produced at stage boundaries, plus review comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePath {
    Quick,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeCard {
    pub id: String,
    pub workflow_id: String,
    pub summary: String,
    pub recommended_path: ScopePath,
    pub status: ArtifactStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchCard {
    pub id: String,
    pub workflow_id: String,
    pub findings: String,
    pub status: ArtifactStatus,
    pub created_at: DateTime<Utc>,
}

/// One ordered code-change unit as planned (before it becomes a `Pulse`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseDescriptor {
    pub id: String,
    pub title: String,
    pub description: String,
    pub expected_changes: Vec<String>,
    pub estimated_size: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub workflow_id: String,
    pub summary: String,
    pub pulses: Vec<PulseDescriptor>,
    pub status: ArtifactStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRecommendation {
    Approve,
    Deny,
    ManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCard {
    pub id: String,
    pub workflow_id: String,
    pub comments: Vec<ReviewComment>,
    pub recommendation: Option<ReviewRecommendation>,
    pub suggested_commit_message: Option<String>,
    pub diff: Option<String>,
    pub status: ArtifactStatus,
    pub created_at: DateTime<Utc>,
}

impl ReviewCard {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            comments: Vec::new(),
            recommendation: None,
            suggested_commit_message: None,
            diff: None,
            status: ArtifactStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentTarget {
    Line,
    File,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CommentSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAuthor {
    Agent,
    User,
}

/// A typed review comment: line, file, or review-level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: String,
    pub target: CommentTarget,
    pub file_path: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub severity: Option<CommentSeverity>,
    pub author: CommentAuthor,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

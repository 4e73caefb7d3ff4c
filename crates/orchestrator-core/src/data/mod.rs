//! Core data model: workflows, sessions, turns, artifacts, pulses, baselines.
//!
//! These are plain, serde-derived structs shared by the repository layer,
//! the agent runner, and the orchestrators. None of them know how they are
//! persisted.

mod artifact;
mod baseline;
mod pulse;
mod session;
mod turn;
mod workflow;

pub use artifact::{
    ArtifactStatus, CommentAuthor, CommentSeverity, CommentTarget, Plan, PulseDescriptor,
    ResearchCard, ReviewCard, ReviewComment, ReviewRecommendation, ScopeCard, ScopePath,
};
pub use baseline::{Baseline, DiagnosticSource, IssueType};
pub use pulse::{Pulse, PulseStatus};
pub use session::{AgentRole, ContextType, Session, SessionStatus};
pub use turn::{Message, Thought, ToolCall, ToolCallStatus, Turn, TurnRole, TurnStatus};
pub use workflow::{PendingArtifactType, Priority, Workflow, WorkflowStatus};

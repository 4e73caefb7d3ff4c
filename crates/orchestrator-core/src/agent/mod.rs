//! Agent runner: drives one session's turn loop against an `LlmClient`.

pub mod llm;
pub mod registry;
pub mod runner;

pub use llm::{AgentMessage, FinishReason, LlmClient, MessageRole, ProposedToolCall, ScriptedLlmClient, ScriptedResponse, StreamPart, ToolSpec};
pub use registry::{AgentRoleConfig, AgentRoleRegistry};
pub use runner::{AgentRunner, RunOptions, RunnerConfig, RunnerError, RunnerServices, WorkflowCallbacks, STAGE_COMPLETION_TOOLS};

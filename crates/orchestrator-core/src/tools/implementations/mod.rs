//! Built-in tool implementations, grouped by the categories named in
//! spec.md §4.1: base (read-only), pulsing (mutating), preflight, review,
//! and block (stage-completion / control-flow) tools.

mod blocks;
mod diffing;
mod grep;
mod list_directory;
mod read_file;
mod record_baseline;
mod review;
mod search;
mod shell;
mod take_note;
mod write_edit;

pub use blocks::{
    AskQuestionsTool, CompletePreflightTool, CompletePulseTool, RequestExtensionTool,
    SubmitPlanTool, SubmitResearchTool, SubmitScopeTool,
};
pub use grep::GrepTool;
pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use record_baseline::RecordBaselineTool;
pub use review::{
    AddFileCommentTool, AddLineCommentTool, AddReviewCommentTool, CompleteReviewTool, GetDiffTool,
    GetScopeCardTool,
};
pub use search::{SemanticSearchTool, WebCodeSearchTool};
pub use shell::ShellTool;
pub use take_note::TakeNoteTool;
pub use write_edit::{EditFileTool, MultiEditTool, WriteFileTool};

use std::sync::Arc;

use crate::tools::registry::{Tool, ToolRegistry};

/// Register every base (read-only) tool. Available to every agent role.
pub async fn register_base_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(ReadFileTool) as Arc<dyn Tool>).await;
    registry.register(Arc::new(ListDirectoryTool)).await;
    registry.register(Arc::new(GrepTool)).await;
    registry.register(Arc::new(TakeNoteTool)).await;
    registry.register(Arc::new(SemanticSearchTool)).await;
    registry.register(Arc::new(WebCodeSearchTool)).await;
}

/// Register the mutating tools available to execution (pulsing) sessions.
pub async fn register_pulsing_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(WriteFileTool)).await;
    registry.register(Arc::new(EditFileTool)).await;
    registry.register(Arc::new(MultiEditTool)).await;
    registry.register(Arc::new(ShellTool)).await;
}

/// Register the preflight-only tools (shell is shared with pulsing).
pub async fn register_preflight_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(ShellTool)).await;
    registry.register(Arc::new(RecordBaselineTool)).await;
}

/// Register the review-stage tools.
pub async fn register_review_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(GetDiffTool)).await;
    registry.register(Arc::new(GetScopeCardTool)).await;
    registry.register(Arc::new(AddLineCommentTool)).await;
    registry.register(Arc::new(AddFileCommentTool)).await;
    registry.register(Arc::new(AddReviewCommentTool)).await;
    registry.register(Arc::new(CompleteReviewTool)).await;
}

/// Register every stage-completion / control-flow block tool.
pub async fn register_block_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(SubmitScopeTool)).await;
    registry.register(Arc::new(SubmitResearchTool)).await;
    registry.register(Arc::new(SubmitPlanTool)).await;
    registry.register(Arc::new(RequestExtensionTool)).await;
    registry.register(Arc::new(AskQuestionsTool)).await;
    registry.register(Arc::new(CompletePreflightTool)).await;
    registry.register(Arc::new(CompletePulseTool)).await;
}

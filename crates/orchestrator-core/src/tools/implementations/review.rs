//! Review-stage tools: `get_diff`, `get_scope_card`, the three
//! `add_*_comment` tools, and `complete_review`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::data::{CommentAuthor, CommentSeverity, CommentTarget, ReviewComment, ReviewRecommendation};
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct GetDiffTool;

#[async_trait]
impl Tool for GetDiffTool {
    fn name(&self) -> &str {
        "get_diff"
    }

    fn description(&self) -> &str {
        "Get the unified diff between the workflow's base branch and the current working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> ToolResult {
        let base_branch = match &ctx.repositories {
            Some(repositories) => match repositories.workflows.get_by_id(&ctx.workflow_id) {
                Ok(Some(workflow)) => workflow.base_branch,
                Ok(None) => "main".to_string(),
                Err(e) => return ToolResult::error(format!("Failed to load workflow: {}", e)),
            },
            None => "main".to_string(),
        };

        match git_diff(&ctx.working_dir, &base_branch) {
            Ok(diff) => ToolResult::success_data(json!({ "diff": diff })),
            Err(e) => ToolResult::error(format!("Failed to compute diff: {}", e)),
        }
    }
}

/// Grounded on krusty-core's `git::run_git` helper: shell to `git`, wrap a
/// non-zero exit as an error carrying stderr.
fn git_diff(working_dir: &std::path::Path, base_branch: &str) -> Result<String, String> {
    let output = std::process::Command::new("git")
        .args(["diff", base_branch, "--"])
        .current_dir(working_dir)
        .output()
        .map_err(|e| format!("failed to run git: {}", e))?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct GetScopeCardTool;

#[async_trait]
impl Tool for GetScopeCardTool {
    fn name(&self) -> &str {
        "get_scope_card"
    }

    fn description(&self) -> &str {
        "Fetch the workflow's approved scope card for review context."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(repositories) = &ctx.repositories else {
            return ToolResult::error("get_scope_card requires a persistence layer, none is configured");
        };

        match repositories.artifacts.get_latest_scope_card(&ctx.workflow_id) {
            Ok(Some(card)) => ToolResult::success_data(serde_json::to_value(card).unwrap_or(Value::Null)),
            Ok(None) => ToolResult::error_with_code("not_found", "No scope card has been submitted for this workflow"),
            Err(e) => ToolResult::error(format!("Failed to load scope card: {}", e)),
        }
    }
}

fn latest_review_card_id(ctx: &ToolContext) -> Result<String, ToolResult> {
    let repositories = ctx
        .repositories
        .as_ref()
        .ok_or_else(|| ToolResult::error("review comment tools require a persistence layer, none is configured"))?;

    match repositories.artifacts.get_latest_review_card(&ctx.workflow_id) {
        Ok(Some(card)) => Ok(card.id),
        Ok(None) => Err(ToolResult::error_with_code(
            "not_found",
            "No review card exists yet for this workflow",
        )),
        Err(e) => Err(ToolResult::error(format!("Failed to load review card: {}", e))),
    }
}

#[derive(Deserialize)]
struct LineCommentParams {
    file_path: String,
    start_line: u32,
    #[serde(default)]
    end_line: Option<u32>,
    severity: CommentSeverity,
    body: String,
}

pub struct AddLineCommentTool;

#[async_trait]
impl Tool for AddLineCommentTool {
    fn name(&self) -> &str {
        "add_line_comment"
    }

    fn description(&self) -> &str {
        "Attach a review comment to a specific line range in a file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "start_line": {"type": "integer"},
                "end_line": {"type": "integer"},
                "severity": {"type": "string", "enum": ["High", "Medium", "Low"]},
                "body": {"type": "string"}
            },
            "required": ["file_path", "start_line", "severity", "body"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: LineCommentParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let review_card_id = match latest_review_card_id(ctx) {
            Ok(id) => id,
            Err(e) => return e,
        };

        let comment = ReviewComment {
            id: uuid::Uuid::new_v4().to_string(),
            target: CommentTarget::Line,
            file_path: Some(params.file_path),
            start_line: Some(params.start_line),
            end_line: Some(params.end_line.unwrap_or(params.start_line)),
            severity: Some(params.severity),
            author: CommentAuthor::Agent,
            body: params.body,
            created_at: chrono::Utc::now(),
        };

        let repositories = ctx.repositories.as_ref().unwrap();
        if let Err(e) = repositories.artifacts.add_review_comment(&review_card_id, &comment) {
            return ToolResult::error(format!("Failed to save comment: {}", e));
        }

        ToolResult::success_data(json!({ "id": comment.id }))
    }
}

#[derive(Deserialize)]
struct FileCommentParams {
    file_path: String,
    severity: CommentSeverity,
    body: String,
}

pub struct AddFileCommentTool;

#[async_trait]
impl Tool for AddFileCommentTool {
    fn name(&self) -> &str {
        "add_file_comment"
    }

    fn description(&self) -> &str {
        "Attach a review comment to an entire file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "severity": {"type": "string", "enum": ["High", "Medium", "Low"]},
                "body": {"type": "string"}
            },
            "required": ["file_path", "severity", "body"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: FileCommentParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let review_card_id = match latest_review_card_id(ctx) {
            Ok(id) => id,
            Err(e) => return e,
        };

        let comment = ReviewComment {
            id: uuid::Uuid::new_v4().to_string(),
            target: CommentTarget::File,
            file_path: Some(params.file_path),
            start_line: None,
            end_line: None,
            severity: Some(params.severity),
            author: CommentAuthor::Agent,
            body: params.body,
            created_at: chrono::Utc::now(),
        };

        let repositories = ctx.repositories.as_ref().unwrap();
        if let Err(e) = repositories.artifacts.add_review_comment(&review_card_id, &comment) {
            return ToolResult::error(format!("Failed to save comment: {}", e));
        }

        ToolResult::success_data(json!({ "id": comment.id }))
    }
}

#[derive(Deserialize)]
struct ReviewCommentParams {
    severity: CommentSeverity,
    body: String,
}

pub struct AddReviewCommentTool;

#[async_trait]
impl Tool for AddReviewCommentTool {
    fn name(&self) -> &str {
        "add_review_comment"
    }

    fn description(&self) -> &str {
        "Attach a review-level comment that applies to the change as a whole."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "severity": {"type": "string", "enum": ["High", "Medium", "Low"]},
                "body": {"type": "string"}
            },
            "required": ["severity", "body"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: ReviewCommentParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let review_card_id = match latest_review_card_id(ctx) {
            Ok(id) => id,
            Err(e) => return e,
        };

        let comment = ReviewComment {
            id: uuid::Uuid::new_v4().to_string(),
            target: CommentTarget::Review,
            file_path: None,
            start_line: None,
            end_line: None,
            severity: Some(params.severity),
            author: CommentAuthor::Agent,
            body: params.body,
            created_at: chrono::Utc::now(),
        };

        let repositories = ctx.repositories.as_ref().unwrap();
        if let Err(e) = repositories.artifacts.add_review_comment(&review_card_id, &comment) {
            return ToolResult::error(format!("Failed to save comment: {}", e));
        }

        ToolResult::success_data(json!({ "id": comment.id }))
    }
}

#[derive(Deserialize)]
struct CompleteReviewParams {
    recommendation: ReviewRecommendation,
    #[serde(default)]
    suggested_commit_message: Option<String>,
}

/// Stage-completion tool for the review stage: the workflow orchestrator's
/// `handleToolResult` reads `recommendation` off the returned data to
/// decide whether to auto-approve, request changes, or hold for manual
/// review (spec.md §4.8).
pub struct CompleteReviewTool;

#[async_trait]
impl Tool for CompleteReviewTool {
    fn name(&self) -> &str {
        "complete_review"
    }

    fn description(&self) -> &str {
        "Finish the review stage with a recommendation: approve, deny, or hand off for manual review."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recommendation": {"type": "string", "enum": ["approve", "deny", "manual_review"]},
                "suggested_commit_message": {"type": "string"}
            },
            "required": ["recommendation"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: CompleteReviewParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let Some(repositories) = &ctx.repositories else {
            return ToolResult::error("complete_review requires a persistence layer, none is configured");
        };

        let review_card_id = match latest_review_card_id(ctx) {
            Ok(id) => id,
            Err(e) => return e,
        };

        let base_branch = match repositories.workflows.get_by_id(&ctx.workflow_id) {
            Ok(Some(workflow)) => workflow.base_branch,
            Ok(None) => "main".to_string(),
            Err(e) => return ToolResult::error(format!("Failed to load workflow: {}", e)),
        };
        let diff = git_diff(&ctx.working_dir, &base_branch).ok();

        if let Err(e) = repositories.artifacts.set_review_card_outcome(
            &review_card_id,
            params.recommendation,
            params.suggested_commit_message.as_deref(),
        ) {
            return ToolResult::error(format!("Failed to update review card: {}", e));
        }

        ToolResult::success_data(json!({
            "review_card_id": review_card_id,
            "recommendation": params.recommendation,
            "suggested_commit_message": params.suggested_commit_message,
            "diff": diff,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ArtifactStatus, ReviewCard};
    use crate::storage::{Database, Repositories};
    use std::sync::Arc;

    fn ctx_with_review_card() -> ToolContext {
        let repositories = Arc::new(Repositories::new(Database::open_in_memory().unwrap()));
        let card = ReviewCard::new("wf-1");
        repositories.artifacts.save_review_card(&card).unwrap();
        ToolContext::new(std::path::PathBuf::from("/tmp"), "wf-1", "sess-1").with_repositories(repositories)
    }

    #[tokio::test]
    async fn add_line_comment_persists_against_latest_review_card() {
        let ctx = ctx_with_review_card();
        let result = AddLineCommentTool
            .execute(
                json!({"file_path": "src/lib.rs", "start_line": 10, "severity": "High", "body": "missing check"}),
                &ctx,
            )
            .await;
        assert!(!result.is_error);

        let card = ctx
            .repositories
            .as_ref()
            .unwrap()
            .artifacts
            .get_latest_review_card("wf-1")
            .unwrap()
            .unwrap();
        assert_eq!(card.comments.len(), 1);
        assert_eq!(card.comments[0].severity, Some(CommentSeverity::High));
    }

    #[tokio::test]
    async fn add_review_comment_without_a_card_is_not_found() {
        let repositories = Arc::new(Repositories::new(Database::open_in_memory().unwrap()));
        let ctx = ToolContext::new(std::path::PathBuf::from("/tmp"), "wf-1", "sess-1").with_repositories(repositories);

        let result = AddReviewCommentTool
            .execute(json!({"severity": "Low", "body": "nit"}), &ctx)
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn complete_review_reports_recommendation() {
        let ctx = ctx_with_review_card();
        let result = CompleteReviewTool
            .execute(json!({"recommendation": "approve"}), &ctx)
            .await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["recommendation"], "approve");
        let _ = ArtifactStatus::Pending;
    }
}

//! Stage-completion and control-flow block tools: `submit_scope`,
//! `submit_research`, `submit_plan`, `request_extension`, `ask_questions`,
//! `complete_preflight`, `complete_pulse`.
//!
//! These are the tools the workflow/pulse orchestrators key off of in
//! `handleToolResult` to drive the stage state machine (spec.md §4.8,
//! §4.9) — each one persists its artifact (or pulse transition) and
//! returns a structured envelope the orchestrator reads back out, rather
//! than leaving stage advancement to be inferred from free text.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::data::{
    ArtifactStatus, Plan, PulseDescriptor, ResearchCard, ScopeCard, ScopePath,
};
use crate::events::{Event, EventType};
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

fn require_repositories(ctx: &ToolContext) -> Result<&crate::storage::Repositories, ToolResult> {
    ctx.repositories
        .as_deref()
        .ok_or_else(|| ToolResult::error("this tool requires a persistence layer, none is configured"))
}

#[derive(Deserialize)]
struct SubmitScopeParams {
    summary: String,
    recommended_path: ScopePath,
}

pub struct SubmitScopeTool;

#[async_trait]
impl Tool for SubmitScopeTool {
    fn name(&self) -> &str {
        "submit_scope"
    }

    fn description(&self) -> &str {
        "Submit the scope card that ends the scoping stage and awaits human approval."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "recommended_path": {"type": "string", "enum": ["quick", "full"]}
            },
            "required": ["summary", "recommended_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: SubmitScopeParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let repositories = match require_repositories(ctx) {
            Ok(r) => r,
            Err(e) => return e,
        };

        let card = ScopeCard {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: ctx.workflow_id.clone(),
            summary: params.summary,
            recommended_path: params.recommended_path,
            status: ArtifactStatus::Pending,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = repositories.artifacts.save_scope_card(&card) {
            return ToolResult::error(format!("Failed to save scope card: {}", e));
        }

        // Marking the workflow awaiting approval and announcing it on the
        // event bus is the workflow orchestrator's job (`handleToolResult`
        // classifies this as an approval-required tool); this tool only
        // persists the artifact it was asked to produce.
        ToolResult::success_data(json!({ "scope_card_id": card.id }))
    }
}

#[derive(Deserialize)]
struct SubmitResearchParams {
    findings: String,
}

pub struct SubmitResearchTool;

#[async_trait]
impl Tool for SubmitResearchTool {
    fn name(&self) -> &str {
        "submit_research"
    }

    fn description(&self) -> &str {
        "Submit the research card that ends the researching stage and awaits human approval."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "findings": {"type": "string"} },
            "required": ["findings"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: SubmitResearchParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let repositories = match require_repositories(ctx) {
            Ok(r) => r,
            Err(e) => return e,
        };

        let card = ResearchCard {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: ctx.workflow_id.clone(),
            findings: params.findings,
            status: ArtifactStatus::Pending,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = repositories.artifacts.save_research_card(&card) {
            return ToolResult::error(format!("Failed to save research card: {}", e));
        }

        ToolResult::success_data(json!({ "research_card_id": card.id }))
    }
}

#[derive(Deserialize)]
struct SubmitPlanParams {
    summary: String,
    pulses: Vec<PulseDescriptor>,
}

pub struct SubmitPlanTool;

#[async_trait]
impl Tool for SubmitPlanTool {
    fn name(&self) -> &str {
        "submit_plan"
    }

    fn description(&self) -> &str {
        "Submit the pulse plan that ends the planning stage and awaits human approval."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "pulses": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "title": {"type": "string"},
                            "description": {"type": "string"},
                            "expected_changes": {"type": "array", "items": {"type": "string"}},
                            "estimated_size": {"type": "string"},
                            "depends_on": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["id", "title", "description", "expected_changes", "estimated_size", "depends_on"]
                    }
                }
            },
            "required": ["summary", "pulses"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: SubmitPlanParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.pulses.is_empty() {
            return ToolResult::invalid_parameters("a plan must include at least one pulse");
        }
        let repositories = match require_repositories(ctx) {
            Ok(r) => r,
            Err(e) => return e,
        };

        let plan = Plan {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: ctx.workflow_id.clone(),
            summary: params.summary,
            pulses: params.pulses,
            status: ArtifactStatus::Pending,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = repositories.artifacts.save_plan(&plan) {
            return ToolResult::error(format!("Failed to save plan: {}", e));
        }

        ToolResult::success_data(json!({ "plan_id": plan.id, "pulse_count": plan.pulses.len() }))
    }
}

#[derive(Deserialize)]
struct RequestExtensionParams {
    reason: String,
}

/// Lets an agent ask the orchestrator for more turns in the current stage
/// rather than being force-ended at the turn budget. The orchestrator
/// reads `reason` back out of the tool result; this tool itself only
/// records the request.
pub struct RequestExtensionTool;

#[async_trait]
impl Tool for RequestExtensionTool {
    fn name(&self) -> &str {
        "request_extension"
    }

    fn description(&self) -> &str {
        "Ask for additional turns to finish the current stage, with a reason."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "reason": {"type": "string"} },
            "required": ["reason"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: RequestExtensionParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        tracing::info!(workflow_id = %ctx.workflow_id, reason = %params.reason, "extension requested");
        ToolResult::success_data(json!({ "reason": params.reason }))
    }
}

#[derive(Deserialize)]
struct AskQuestionsParams {
    questions: Vec<String>,
}

pub struct AskQuestionsTool;

#[async_trait]
impl Tool for AskQuestionsTool {
    fn name(&self) -> &str {
        "ask_questions"
    }

    fn description(&self) -> &str {
        "Pause the stage and ask the human one or more clarifying questions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["questions"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: AskQuestionsParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.questions.is_empty() {
            return ToolResult::invalid_parameters("questions must be a non-empty list");
        }

        if let Some(event_bus) = &ctx.event_bus {
            event_bus.broadcast(Event::new(
                EventType::QuestionsAsked,
                json!({
                    "workflow_id": ctx.workflow_id,
                    "session_id": ctx.session_id,
                    "questions": params.questions,
                }),
            ));
        }

        ToolResult::success_data(json!({ "questions": params.questions }))
    }
}

pub struct CompletePreflightTool;

#[async_trait]
impl Tool for CompletePreflightTool {
    fn name(&self) -> &str {
        "complete_preflight"
    }

    fn description(&self) -> &str {
        "Mark preflight setup complete, unblocking the first pulse."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> ToolResult {
        let repositories = match require_repositories(ctx) {
            Ok(r) => r,
            Err(e) => return e,
        };

        if let Err(e) = repositories.pulses.complete_preflight(&ctx.workflow_id) {
            return ToolResult::error(format!("Failed to complete preflight: {}", e));
        }

        ToolResult::success_data(json!({ "completed": true }))
    }
}

#[derive(Deserialize)]
struct CompletePulseParams {
    success: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Marks the currently running pulse succeeded or failed. Per the
/// documented dual-pathway behavior (spec.md §9 open question): a
/// `success: false` report is not itself a tool error — it is a normal,
/// successfully-recorded outcome that the pulse orchestrator routes to
/// `failPulse` rather than `completePulse`.
pub struct CompletePulseTool;

#[async_trait]
impl Tool for CompletePulseTool {
    fn name(&self) -> &str {
        "complete_pulse"
    }

    fn description(&self) -> &str {
        "Report the current pulse as succeeded or failed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "success": {"type": "boolean"},
                "reason": {"type": "string", "description": "Required when success is false"}
            },
            "required": ["success"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: CompletePulseParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !params.success && params.reason.is_none() {
            return ToolResult::invalid_parameters("reason is required when success is false");
        }

        let repositories = match require_repositories(ctx) {
            Ok(r) => r,
            Err(e) => return e,
        };

        let pulse = match repositories.pulses.get_running_pulse(&ctx.workflow_id) {
            Ok(Some(p)) => p,
            Ok(None) => return ToolResult::error_with_code("not_found", "No pulse is currently running for this workflow"),
            Err(e) => return ToolResult::error(format!("Failed to load running pulse: {}", e)),
        };

        let outcome = if params.success {
            repositories.pulses.complete_pulse(&pulse.id)
        } else {
            repositories
                .pulses
                .fail_pulse(&pulse.id, params.reason.as_deref().unwrap_or("no reason given"))
        };
        if let Err(e) = outcome {
            return ToolResult::error(format!("Failed to record pulse outcome: {}", e));
        }

        ToolResult::success_data(json!({
            "pulse_id": pulse.id,
            "success": params.success,
            "reason": params.reason,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Pulse, PulseStatus};
    use crate::storage::{Database, Repositories};
    use std::sync::Arc;

    fn ctx_with_repos() -> ToolContext {
        let repositories = Arc::new(Repositories::new(Database::open_in_memory().unwrap()));
        ToolContext::new(std::path::PathBuf::from("/tmp"), "wf-1", "sess-1").with_repositories(repositories)
    }

    #[tokio::test]
    async fn submit_scope_persists_the_card_it_describes() {
        let ctx = ctx_with_repos();
        let result = SubmitScopeTool
            .execute(json!({"summary": "add auth", "recommended_path": "quick"}), &ctx)
            .await;
        assert!(!result.is_error);

        let card = ctx.repositories.as_ref().unwrap().artifacts.get_latest_scope_card("wf-1").unwrap().unwrap();
        assert_eq!(card.summary, "add auth");
        assert_eq!(card.recommended_path, crate::data::ScopePath::Quick);
    }

    #[tokio::test]
    async fn submit_plan_requires_at_least_one_pulse() {
        let ctx = ctx_with_repos();
        let result = SubmitPlanTool
            .execute(json!({"summary": "empty", "pulses": []}), &ctx)
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn complete_pulse_failure_is_not_a_tool_error() {
        let ctx = ctx_with_repos();
        let repositories = ctx.repositories.as_ref().unwrap();
        let pulse = Pulse {
            id: "p0".to_string(),
            workflow_id: "wf-1".to_string(),
            planned_pulse_id: "p0".to_string(),
            planned_index: 0,
            status: PulseStatus::Proposed,
            description: "".to_string(),
            depends_on: vec![],
            has_unresolved_issues: false,
            is_recovery_checkpoint: false,
            rejection_count: 0,
            failure_reason: None,
            worktree_path: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        };
        repositories.pulses.create(&pulse).unwrap();
        repositories.pulses.start_pulse("p0", "/tmp/wt-p0").unwrap();

        let result = CompletePulseTool
            .execute(json!({"success": false, "reason": "test failed"}), &ctx)
            .await;
        assert!(!result.is_error);

        let pulses = repositories.pulses.get_pulses_for_workflow("wf-1").unwrap();
        assert_eq!(pulses[0].status, PulseStatus::Failed);
    }

    #[tokio::test]
    async fn complete_pulse_without_reason_when_failed_is_invalid() {
        let ctx = ctx_with_repos();
        let result = CompletePulseTool.execute(json!({"success": false}), &ctx).await;
        assert!(result.is_error);
    }
}

//! `record_baseline`: record a pre-existing diagnostic during preflight so
//! later pulse verification treats matching issues as already present
//! rather than newly introduced.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::data::{Baseline, DiagnosticSource, IssueType};
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

#[derive(Deserialize)]
struct Params {
    issue_type: IssueType,
    source: DiagnosticSource,
    pattern: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub struct RecordBaselineTool;

#[async_trait]
impl Tool for RecordBaselineTool {
    fn name(&self) -> &str {
        "record_baseline"
    }

    fn description(&self) -> &str {
        "Record a pre-existing diagnostic (a known failing test, a standing lint warning) so \
         later verification does not treat it as a regression introduced by this workflow."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "issue_type": {"type": "string", "enum": ["error", "warning"]},
                "source": {"type": "string", "enum": ["build", "lint", "test"]},
                "pattern": {"type": "string", "description": "Glob matched against the diagnostic message"},
                "file_path": {"type": "string", "description": "Glob matched against the diagnostic's file path"},
                "description": {"type": "string"}
            },
            "required": ["issue_type", "source", "pattern"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let Some(repositories) = &ctx.repositories else {
            return ToolResult::error("record_baseline requires a persistence layer, none is configured");
        };

        let baseline = Baseline {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: ctx.workflow_id.clone(),
            issue_type: params.issue_type,
            source: params.source,
            pattern: params.pattern,
            file_path: params.file_path,
            description: params.description,
        };

        if let Err(e) = repositories.pulses.record_baseline(&baseline) {
            return ToolResult::error(format!("Failed to record baseline: {}", e));
        }

        ToolResult::success_data(json!({ "id": baseline.id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, Repositories};
    use std::sync::Arc;

    fn ctx_with_repos() -> ToolContext {
        let repositories = Arc::new(Repositories::new(Database::open_in_memory().unwrap()));
        ToolContext::new(std::path::PathBuf::from("/tmp"), "wf-1", "sess-1").with_repositories(repositories)
    }

    #[tokio::test]
    async fn records_a_baseline_and_it_is_queryable() {
        let ctx = ctx_with_repos();
        let result = RecordBaselineTool
            .execute(
                json!({
                    "issue_type": "warning",
                    "source": "lint",
                    "pattern": "unused import*",
                    "file_path": "src/*.rs"
                }),
                &ctx,
            )
            .await;
        assert!(!result.is_error);

        let count = ctx.repositories.unwrap().pulses.count_baselines("wf-1").unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn requires_persistence_to_be_configured() {
        let ctx = ToolContext::new(std::path::PathBuf::from("/tmp"), "wf-1", "sess-1");
        let result = RecordBaselineTool
            .execute(
                json!({"issue_type": "error", "source": "build", "pattern": "*"}),
                &ctx,
            )
            .await;
        assert!(result.is_error);
    }
}

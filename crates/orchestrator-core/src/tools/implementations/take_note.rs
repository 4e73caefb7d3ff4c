//! `take_note`: let an agent record a free-form note for its own later
//! reference within the turn. The note round-trips through the tool
//! envelope only (it does not get its own storage table); the agent
//! runner is what folds the echoed note back into context on the next
//! turn, the same way it folds back any other tool result.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

#[derive(Deserialize)]
struct Params {
    note: String,
}

pub struct TakeNoteTool;

#[async_trait]
impl Tool for TakeNoteTool {
    fn name(&self) -> &str {
        "take_note"
    }

    fn description(&self) -> &str {
        "Record a note for your own later reference in this session."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note": {"type": "string"}
            },
            "required": ["note"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        ToolResult::success_data(json!({ "recorded": true, "note": params.note }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new(std::path::PathBuf::from("/tmp"), "wf-1", "sess-1")
    }

    #[tokio::test]
    async fn records_note_without_persistence() {
        let result = TakeNoteTool
            .execute(json!({"note": "remember to check the config"}), &ctx())
            .await;
        assert!(!result.is_error);
    }
}

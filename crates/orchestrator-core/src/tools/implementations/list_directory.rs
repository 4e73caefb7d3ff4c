//! `list_directory`: shallow listing of a directory relative to the
//! working directory, files and subdirectories distinguished.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    path: Option<String>,
}

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the immediate contents of a directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list, defaults to the working directory root"}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let relative = params.path.unwrap_or_else(|| ".".to_string());
        let resolved = match ctx.resolve_path(&relative) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => return ToolResult::error_with_code("not_found", format!("Cannot list '{}': {}", relative, e)),
        };

        let mut entries = Vec::new();
        loop {
            let next = match read_dir.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => return ToolResult::error(format!("Error while listing '{}': {}", relative, e)),
            };
            let is_dir = next.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(json!({
                "name": next.file_name().to_string_lossy(),
                "is_directory": is_dir,
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        ToolResult::success_data(json!({ "path": relative, "entries": entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(dir.to_path_buf(), "wf-1", "sess-1")
    }

    #[tokio::test]
    async fn lists_files_and_directories() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let result = ListDirectoryTool.execute(json!({}), &ctx(dir.path())).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        let entries = parsed["data"]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        let sub = entries.iter().find(|e| e["name"] == "sub").unwrap();
        assert_eq!(sub["is_directory"], true);
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let result = ListDirectoryTool
            .execute(json!({"path": "missing"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
    }
}

//! `read_file`: read a text file relative to the session's working directory.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_BYTES: usize = 512 * 1024;

#[derive(Deserialize)]
struct Params {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file's contents, optionally a line range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the working directory"},
                "offset": {"type": "integer", "description": "1-indexed line to start from"},
                "limit": {"type": "integer", "description": "Maximum number of lines to return"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let resolved = match ctx.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(b) => b,
            Err(e) => return ToolResult::error_with_code("not_found", format!("Cannot read '{}': {}", params.path, e)),
        };

        if bytes.len() > MAX_BYTES {
            return ToolResult::error(format!(
                "File '{}' is {} bytes, which exceeds the {} byte read limit",
                params.path,
                bytes.len(),
                MAX_BYTES
            ));
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();

        let offset = params.offset.unwrap_or(1).max(1);
        let selected = if params.offset.is_some() || params.limit.is_some() {
            let lines: Vec<&str> = content.lines().collect();
            let start = offset.saturating_sub(1).min(lines.len());
            let end = match params.limit {
                Some(limit) => (start + limit).min(lines.len()),
                None => lines.len(),
            };
            lines[start..end].join("\n")
        } else {
            content
        };

        ToolResult::success_data(json!({ "path": params.path, "content": selected }))
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
    async fn reads_whole_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "line1\nline2\nline3").unwrap();

        let result = ReadFileTool
            .execute(json!({"path": "a.txt"}), &ctx(dir.path()))
            .await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["content"], "line1\nline2\nline3");
    }

    #[tokio::test]
    async fn reads_a_line_range() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour").unwrap();

        let result = ReadFileTool
            .execute(json!({"path": "a.txt", "offset": 2, "limit": 2}), &ctx(dir.path()))
            .await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["content"], "two\nthree");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let result = ReadFileTool
            .execute(json!({"path": "missing.txt"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempdir().unwrap();
        let result = ReadFileTool
            .execute(json!({"path": "../outside.txt"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
    }
}

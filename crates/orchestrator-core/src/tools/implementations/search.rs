//! `semantic_search` and `web_code_search`: both named in spec.md §4.1 as
//! optional, non-core tools. Neither gets a real implementation here
//! (embeddings and internet access are explicitly out of scope) — each is
//! an honest stand-in that tells the caller what it actually did, rather
//! than silently returning nothing or pretending to a capability the
//! crate does not have.
//!
//! `semantic_search` degrades to a literal substring search across the
//! working directory (the same walk `grep` does, without regex), which is
//! still useful for an agent even though it is not semantic.
//! `web_code_search` has no local substitute and reports `not_configured`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_MATCHES: usize = 50;

#[derive(Deserialize)]
struct SemanticSearchParams {
    query: String,
}

pub struct SemanticSearchTool;

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &str {
        "semantic_search"
    }

    fn description(&self) -> &str {
        "Search the working directory for text related to a query. Falls back to literal \
         substring matching: there is no embedding index behind this tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: SemanticSearchParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let needle = params.query.to_lowercase();
        let mut matches = Vec::new();
        walk(&ctx.working_dir, &ctx.working_dir, &needle, &mut matches);

        ToolResult::success_data(json!({
            "matches": matches,
            "note": "semantic_search performs literal substring matching, not embedding-based retrieval",
        }))
    }
}

fn walk(dir: &std::path::Path, working_dir: &std::path::Path, needle: &str, matches: &mut Vec<Value>) {
    if matches.len() >= MAX_MATCHES {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        if matches.len() >= MAX_MATCHES {
            return;
        }
        let path = entry.path();
        let file_name = entry.file_name();
        if file_name == ".git" || file_name == "target" || file_name == "node_modules" {
            continue;
        }
        if path.is_dir() {
            walk(&path, working_dir, needle, matches);
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        for (line_number, line) in content.lines().enumerate() {
            if line.to_lowercase().contains(needle) {
                let relative = path.strip_prefix(working_dir).unwrap_or(&path);
                matches.push(json!({
                    "path": relative.to_string_lossy(),
                    "line": line_number + 1,
                    "text": line,
                }));
                if matches.len() >= MAX_MATCHES {
                    return;
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct WebCodeSearchParams {
    #[serde(default)]
    query: Option<String>,
}

pub struct WebCodeSearchTool;

#[async_trait]
impl Tool for WebCodeSearchTool {
    fn name(&self) -> &str {
        "web_code_search"
    }

    fn description(&self) -> &str {
        "Search the public internet for code examples. Not configured in this deployment."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        let _params: WebCodeSearchParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        ToolResult::error_with_code(
            "not_configured",
            "web_code_search has no network provider configured in this deployment",
        )
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
    async fn semantic_search_is_case_insensitive_substring() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn authenticate_user() {}").unwrap();

        let result = SemanticSearchTool
            .execute(json!({"query": "AUTHENTICATE"}), &ctx(dir.path()))
            .await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn web_code_search_reports_not_configured() {
        let dir = tempdir().unwrap();
        let result = WebCodeSearchTool
            .execute(json!({"query": "x"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "not_configured");
    }
}

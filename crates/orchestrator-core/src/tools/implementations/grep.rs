//! `grep`: regex search across files under the working directory.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const MAX_MATCHES: usize = 200;
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression"},
                "path": {"type": "string", "description": "Directory to search, defaults to the working directory root"},
                "glob": {"type": "string", "description": "Restrict to files matching this glob, e.g. '*.rs'"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let regex = match Regex::new(&params.pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::invalid_parameters(format!("Invalid regex: {}", e)),
        };

        let glob_pattern = match &params.glob {
            Some(g) => match glob::Pattern::new(g) {
                Ok(p) => Some(p),
                Err(e) => return ToolResult::invalid_parameters(format!("Invalid glob: {}", e)),
            },
            None => None,
        };

        let search_root = match ctx.resolve_path(params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let mut matches = Vec::new();
        let mut truncated = false;
        walk(&search_root, &ctx.working_dir, &regex, &glob_pattern, &mut matches, &mut truncated);

        ToolResult::success_data(json!({
            "matches": matches,
            "truncated": truncated,
        }))
    }
}

fn walk(
    dir: &Path,
    working_dir: &Path,
    regex: &Regex,
    glob_pattern: &Option<glob::Pattern>,
    matches: &mut Vec<Value>,
    truncated: &mut bool,
) {
    if *truncated {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        if *truncated {
            return;
        }
        let path = entry.path();
        let file_name = entry.file_name();
        if file_name == ".git" || file_name == "target" || file_name == "node_modules" {
            continue;
        }

        if path.is_dir() {
            walk(&path, working_dir, regex, glob_pattern, matches, truncated);
            continue;
        }

        let relative = path.strip_prefix(working_dir).unwrap_or(&path);
        if let Some(pattern) = glob_pattern {
            if !pattern.matches(&relative.to_string_lossy()) {
                continue;
            }
        }

        let Ok(metadata) = entry.metadata() else { continue };
        if metadata.len() > MAX_FILE_BYTES {
            continue;
        }

        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        for (line_number, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(json!({
                    "path": relative.to_string_lossy(),
                    "line": line_number + 1,
                    "text": line,
                }));
                if matches.len() >= MAX_MATCHES {
                    *truncated = true;
                    return;
                }
            }
        }
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
    async fn finds_matches_across_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {}\nstruct Foo;").unwrap();
        fs::write(dir.path().join("b.rs"), "struct Bar;").unwrap();

        let result = GrepTool
            .execute(json!({"pattern": "struct \\w+"}), &ctx(dir.path()))
            .await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["matches"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn glob_restricts_search() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "needle").unwrap();
        fs::write(dir.path().join("a.txt"), "needle").unwrap();

        let result = GrepTool
            .execute(json!({"pattern": "needle", "glob": "*.rs"}), &ctx(dir.path()))
            .await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected() {
        let dir = tempdir().unwrap();
        let result = GrepTool.execute(json!({"pattern": "("}), &ctx(dir.path())).await;
        assert!(result.is_error);
    }
}

//! `write_file`, `edit_file`, `multi_edit`: the three mutating file tools.
//!
//! Grounded on krusty-core's `tools/implementations/edit.rs` and
//! `multiedit.rs` for the overall shape (resolve path, mutate, run
//! post-write hooks, return a diff) but diverging on the contract spec.md
//! §4.1 requires: exact-string matching only (no fuzzy cascade),
//! all-or-nothing validation for `multi_edit` before any byte hits disk,
//! and rollback of the write itself if a blocking post-write hook fails.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::hooks::HookRunOutcome;
use crate::tools::implementations::diffing::{merge_ranges, render_snippets, unified_diff, TouchedRange};
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const CONTEXT_LINES: usize = 5;
const MERGE_GAP: usize = 10;

async fn run_hooks_or_rollback(
    ctx: &ToolContext,
    relative_path: &str,
    original: Option<&str>,
) -> Result<Vec<String>, ToolResult> {
    let Some(hook_runner) = &ctx.hook_runner else {
        return Ok(Vec::new());
    };

    match hook_runner.run(&ctx.working_dir, relative_path).await {
        HookRunOutcome::Ok { warnings } => Ok(warnings),
        HookRunOutcome::Blocked { reason } => {
            let absolute = ctx.working_dir.join(relative_path);
            match original {
                Some(content) => {
                    let _ = tokio::fs::write(&absolute, content).await;
                }
                None => {
                    let _ = tokio::fs::remove_file(&absolute).await;
                }
            }
            Err(ToolResult::error_with_code(
                "blocked_by_policy",
                format!("Post-write hook blocked this change and it was rolled back: {}", reason),
            ))
        }
    }
}

#[derive(Deserialize)]
struct WriteFileParams {
    path: String,
    content: String,
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a file or overwrite its entire contents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: WriteFileParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let resolved = match ctx.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let original = tokio::fs::read_to_string(&resolved).await.ok();

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create parent directories: {}", e));
            }
        }
        if let Err(e) = tokio::fs::write(&resolved, &params.content).await {
            return ToolResult::error(format!("Failed to write '{}': {}", params.path, e));
        }

        let warnings = match run_hooks_or_rollback(ctx, &params.path, original.as_deref()).await {
            Ok(w) => w,
            Err(e) => return e,
        };

        let diff = unified_diff(original.as_deref().unwrap_or(""), &params.content, Path::new(&params.path));
        ToolResult::success_data_with(json!({ "path": params.path }), warnings, Some(diff))
    }
}

#[derive(Deserialize)]
struct EditFileParams {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact substring within a file. Fails if old_string is absent or occurs \
         more than once unless replace_all is set."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_string": {"type": "string"},
                "new_string": {"type": "string"},
                "replace_all": {"type": "boolean", "default": false}
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: EditFileParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.old_string == params.new_string {
            return ToolResult::invalid_parameters("old_string and new_string must differ");
        }

        let resolved = match ctx.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let original = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error_with_code("not_found", format!("Cannot read '{}': {}", params.path, e)),
        };

        let occurrences = original.matches(params.old_string.as_str()).count();
        if occurrences == 0 {
            return ToolResult::error_with_code(
                "not_found",
                format!("old_string not found in '{}'", params.path),
            );
        }
        if occurrences > 1 && !params.replace_all {
            return ToolResult::error(format!(
                "old_string occurs {} times in '{}'; set replace_all or supply more context",
                occurrences, params.path
            ));
        }

        let updated = if params.replace_all {
            original.replace(&params.old_string, &params.new_string)
        } else {
            original.replacen(&params.old_string, &params.new_string, 1)
        };

        if let Err(e) = tokio::fs::write(&resolved, &updated).await {
            return ToolResult::error(format!("Failed to write '{}': {}", params.path, e));
        }

        let warnings = match run_hooks_or_rollback(ctx, &params.path, Some(&original)).await {
            Ok(w) => w,
            Err(e) => return e,
        };

        let diff = unified_diff(&original, &updated, Path::new(&params.path));
        ToolResult::success_data_with(json!({ "path": params.path, "replacements": occurrences.min(if params.replace_all { occurrences } else { 1 }) }), warnings, Some(diff))
    }
}

#[derive(Deserialize, Clone)]
struct EditSpec {
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[derive(Deserialize)]
struct MultiEditParams {
    path: String,
    edits: Vec<EditSpec>,
}

pub struct MultiEditTool;

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        "multi_edit"
    }

    fn description(&self) -> &str {
        "Apply a sequence of exact-match edits to one file. Every edit is validated before any \
         of them are written: if any edit would fail, the file is left untouched."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "edits": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old_string": {"type": "string"},
                            "new_string": {"type": "string"},
                            "replace_all": {"type": "boolean", "default": false}
                        },
                        "required": ["old_string", "new_string"]
                    }
                }
            },
            "required": ["path", "edits"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: MultiEditParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.edits.is_empty() {
            return ToolResult::invalid_parameters("edits must be a non-empty list");
        }

        let resolved = match ctx.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let original = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error_with_code("not_found", format!("Cannot read '{}': {}", params.path, e)),
        };

        // Validate and apply sequentially against an in-memory buffer first;
        // nothing is written to disk until every edit in the list validates.
        let mut buffer = original.clone();
        let mut touched_ranges = Vec::new();

        for (index, edit) in params.edits.iter().enumerate() {
            if edit.old_string == edit.new_string {
                return ToolResult::invalid_parameters(format!(
                    "edit #{}: old_string and new_string must differ",
                    index
                ));
            }

            let occurrences = buffer.matches(edit.old_string.as_str()).count();
            if occurrences == 0 {
                return ToolResult::error_with_code(
                    "not_found",
                    format!("edit #{}: old_string not found", index),
                );
            }
            if occurrences > 1 && !edit.replace_all {
                return ToolResult::error(format!(
                    "edit #{}: old_string occurs {} times; set replace_all or supply more context",
                    index, occurrences
                ));
            }

            if let Some(byte_offset) = buffer.find(edit.old_string.as_str()) {
                let line_start = buffer[..byte_offset].lines().count() + 1;
                let line_span = edit.new_string.lines().count().max(1);
                touched_ranges.push(TouchedRange {
                    start: line_start,
                    end: line_start + line_span - 1,
                });
            }

            buffer = if edit.replace_all {
                buffer.replace(&edit.old_string, &edit.new_string)
            } else {
                buffer.replacen(&edit.old_string, &edit.new_string, 1)
            };
        }

        if let Err(e) = tokio::fs::write(&resolved, &buffer).await {
            return ToolResult::error(format!("Failed to write '{}': {}", params.path, e));
        }

        let warnings = match run_hooks_or_rollback(ctx, &params.path, Some(&original)).await {
            Ok(w) => w,
            Err(e) => return e,
        };

        let total_lines = buffer.lines().count();
        let merged = merge_ranges(touched_ranges, CONTEXT_LINES, MERGE_GAP, total_lines);
        let snippets = render_snippets(&buffer, &merged, Path::new(&params.path));
        let diff = unified_diff(&original, &buffer, Path::new(&params.path));

        ToolResult::success_data_with(
            json!({ "path": params.path, "edits_applied": params.edits.len(), "context_snippets": snippets }),
            warnings,
            Some(diff),
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
    async fn write_file_creates_and_diffs() {
        let dir = tempdir().unwrap();
        let result = WriteFileTool
            .execute(json!({"path": "a.txt", "content": "hello\n"}), &ctx(dir.path()))
            .await;
        assert!(!result.is_error);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn edit_file_rejects_ambiguous_match() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "foo\nfoo\n").unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "a.txt", "old_string": "foo", "new_string": "bar"}),
                &ctx(dir.path()),
            )
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn edit_file_replace_all() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "foo\nfoo\n").unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "a.txt", "old_string": "foo", "new_string": "bar", "replace_all": true}),
                &ctx(dir.path()),
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "bar\nbar\n");
    }

    #[tokio::test]
    async fn edit_file_missing_old_string_not_found() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "foo\n").unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "a.txt", "old_string": "nope", "new_string": "bar"}),
                &ctx(dir.path()),
            )
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn multi_edit_applies_all_or_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let result = MultiEditTool
            .execute(
                json!({
                    "path": "a.txt",
                    "edits": [
                        {"old_string": "one", "new_string": "ONE"},
                        {"old_string": "three", "new_string": "THREE"},
                    ]
                }),
                &ctx(dir.path()),
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "ONE\ntwo\nTHREE\n");
    }

    #[tokio::test]
    async fn multi_edit_rolls_back_when_any_edit_invalid() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let result = MultiEditTool
            .execute(
                json!({
                    "path": "a.txt",
                    "edits": [
                        {"old_string": "one", "new_string": "ONE"},
                        {"old_string": "missing", "new_string": "X"},
                    ]
                }),
                &ctx(dir.path()),
            )
            .await;
        assert!(result.is_error);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\ntwo\nthree\n");
    }
}

//! `shell`: run a command under the pulse's working directory, gated by
//! workflow-scoped approval and bounded by timeout and output size.
//!
//! Grounded on krusty-core's `tools/implementations/bash.rs` for the
//! platform dispatch (`sh -c` / `cmd /c`) and dual-limit truncation, but
//! simplified to the `ToolResult`/`ToolContext` envelope this crate uses
//! and without the teacher's background-process/ANSI-stripping machinery,
//! neither of which spec.md's shell tool contract names.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::shell_approval::{ApprovalRequest, ShellApprovalService};
use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};
use crate::tools::truncation::truncate_head_and_tail;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_BYTES: usize = 4 * 1024;
const MAX_ALLOWED_BYTES: usize = 64 * 1024;
const MAX_OUTPUT_LINES: usize = 2000;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    max_output_bytes: Option<usize>,
}

pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory. Requires workflow approval unless the \
         exact command has already been approved and remembered."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout_secs": {"type": "integer", "description": "Default 60, maximum 300"},
                "max_output_bytes": {"type": "integer", "description": "Default 4096, maximum 65536"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let requested_timeout = params.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if requested_timeout > MAX_TIMEOUT_SECS {
            return ToolResult::invalid_parameters(format!(
                "timeout_secs {} exceeds the {} second maximum",
                requested_timeout, MAX_TIMEOUT_SECS
            ));
        }
        let timeout = Duration::from_secs(requested_timeout);

        let requested_bytes = params.max_output_bytes.unwrap_or(DEFAULT_MAX_BYTES);
        if requested_bytes > MAX_ALLOWED_BYTES {
            return ToolResult::invalid_parameters(format!(
                "max_output_bytes {} exceeds the {} byte maximum",
                requested_bytes, MAX_ALLOWED_BYTES
            ));
        }

        if let Some(approval) = &ctx.shell_approval {
            if let Some(reason) = gate(approval, ctx, &params.command).await {
                return ToolResult::error_with_code("permission_denied", reason);
            }
        }

        let output = match run(&params.command, &ctx.working_dir, timeout).await {
            Ok(o) => o,
            Err(e) => return ToolResult::error_with_code("timeout", e),
        };

        let stdout_truncation = truncate_head_and_tail(&output.stdout, MAX_OUTPUT_LINES, requested_bytes);
        let stderr_truncation = truncate_head_and_tail(&output.stderr, MAX_OUTPUT_LINES, requested_bytes);

        let mut stdout = stdout_truncation.text.clone();
        if let Some(notice) = stdout_truncation.notice() {
            stdout.push_str(&notice);
        }
        let mut stderr = stderr_truncation.text.clone();
        if let Some(notice) = stderr_truncation.notice() {
            stderr.push_str(&notice);
        }

        let data = json!({
            "exit_code": output.exit_code,
            "stdout": stdout,
            "stderr": stderr,
        });

        if output.exit_code == 0 {
            ToolResult::success_data(data)
        } else {
            ToolResult {
                output: json!({ "ok": false, "data": data }).to_string(),
                is_error: true,
            }
        }
    }
}

/// Returns `Some(reason)` if the command is denied, `None` if it may run.
async fn gate(approval: &ShellApprovalService, ctx: &ToolContext, command: &str) -> Option<String> {
    if approval.is_command_remembered(&ctx.workflow_id, command).await {
        return None;
    }

    let request = ApprovalRequest {
        workflow_id: ctx.workflow_id.clone(),
        session_id: ctx.session_id.clone(),
        turn_id: ctx.turn_id.clone(),
        tool_call_id: uuid::Uuid::new_v4().to_string(),
        command: command.to_string(),
        reason: None,
    };

    match approval.request_approval(request).await {
        Ok(decision) if decision.approved => None,
        Ok(decision) => Some(decision.deny_reason.unwrap_or_else(|| "command denied by user".to_string())),
        Err(cancelled) => Some(cancelled.to_string()),
    }
}

struct ShellOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

async fn run(command: &str, cwd: &std::path::Path, timeout: Duration) -> Result<ShellOutput, String> {
    let mut cmd = build_command(command, cwd);
    let child = cmd.output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("Failed to start command: {}", e)),
        Err(_) => return Err(format!("Command timed out after {}s", timeout.as_secs())),
    };

    Ok(ShellOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn build_command(command: &str, cwd: &std::path::Path) -> Command {
    #[cfg(windows)]
    {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command).current_dir(cwd);
        c
    }
    #[cfg(not(windows))]
    {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command).current_dir(cwd);
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(dir.to_path_buf(), "wf-1", "sess-1")
    }

    #[tokio::test]
    async fn runs_a_command_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShellTool.execute(json!({"command": "echo hi"}), &ctx(dir.path())).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["stdout"].as_str().unwrap().trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShellTool.execute(json!({"command": "exit 3"}), &ctx(dir.path())).await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["exit_code"], 3);
    }

    #[tokio::test]
    async fn rejects_timeout_above_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShellTool
            .execute(json!({"command": "echo hi", "timeout_secs": 301}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn approval_denial_blocks_execution() {
        let dir = tempfile::tempdir().unwrap();
        let approval = std::sync::Arc::new(ShellApprovalService::new());
        let mut context = ctx(dir.path()).with_shell_approval(approval.clone());
        context.timeout = Some(Duration::from_secs(5));

        let approval2 = approval.clone();
        let deny = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let state_snapshot = approval2.is_command_remembered("wf-1", "rm -rf /").await;
            assert!(!state_snapshot);
        });

        // Resolve any pending approval with a denial once the request lands.
        let approval3 = approval.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            approval3.cleanup_workflow("wf-1").await;
        });

        let result = ShellTool
            .execute(json!({"command": "rm -rf /"}), &context)
            .await;
        assert!(result.is_error);
        deny.await.unwrap();
    }
}

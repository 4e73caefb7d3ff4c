//! Tool registry: trait, execution context, and hook-gated dispatch.
//!
//! Grounded on krusty-core's `tools::registry` module: a `Tool` trait held
//! behind `Arc<dyn Tool>` in a name-keyed map, pre/post hooks that can block
//! or observe execution, and a JSON success/error envelope so every tool's
//! output is uniformly parseable by the agent runner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::events::EventBus;
use crate::shell_approval::ShellApprovalService;
use crate::storage::Repositories;
use crate::tools::hooks::PostWriteHookRunner;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a hook execution: continue, or block with a reason surfaced to
/// the caller as a structured tool error.
#[derive(Debug)]
pub enum HookResult {
    Continue,
    Block { reason: String },
}

#[async_trait]
pub trait PreToolHook: Send + Sync {
    async fn before_execute(&self, name: &str, params: &Value, ctx: &ToolContext) -> HookResult;
}

#[async_trait]
pub trait PostToolHook: Send + Sync {
    async fn after_execute(
        &self,
        name: &str,
        params: &Value,
        result: &ToolResult,
        duration: Duration,
    );
}

/// Outcome of a single tool call, encoded as a JSON envelope in `output`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn success_data(data: Value) -> Self {
        Self::success_data_with(data, Vec::new(), None)
    }

    pub fn success_data_with(data: Value, warnings: Vec<String>, diff: Option<String>) -> Self {
        let mut envelope = serde_json::Map::new();
        envelope.insert("ok".to_string(), Value::Bool(true));
        envelope.insert("data".to_string(), data);
        if !warnings.is_empty() {
            envelope.insert(
                "warnings".to_string(),
                Value::Array(warnings.into_iter().map(Value::String).collect()),
            );
        }
        if let Some(diff) = diff.filter(|d| !d.is_empty()) {
            envelope.insert("diff".to_string(), Value::String(diff));
        }
        Self {
            output: Value::Object(envelope).to_string(),
            is_error: false,
        }
    }

    pub fn error_with_code(code: &str, msg: impl std::fmt::Display) -> Self {
        let mut envelope = serde_json::Map::new();
        envelope.insert("ok".to_string(), Value::Bool(false));
        envelope.insert(
            "error".to_string(),
            serde_json::json!({ "code": code, "message": msg.to_string() }),
        );
        Self {
            output: Value::Object(envelope).to_string(),
            is_error: true,
        }
    }

    pub fn invalid_parameters(msg: impl std::fmt::Display) -> Self {
        Self::error_with_code("invalid_parameters", msg)
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        let message = msg.to_string();
        let code = classify_error_code(&message);
        Self::error_with_code(code, message)
    }
}

fn classify_error_code(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("invalid parameters") || lower.contains("missing field") {
        "invalid_parameters"
    } else if lower.contains("access denied") || lower.contains("outside workspace") {
        "access_denied"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("no match") || lower.contains("not found") {
        "not_found"
    } else if lower.contains("denied") {
        "permission_denied"
    } else if lower.contains("unknown tool") {
        "unknown_tool"
    } else {
        "tool_error"
    }
}

pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|e| ToolResult::invalid_parameters(format!("Invalid parameters: {}", e)))
}

/// Everything a tool implementation needs to act on behalf of one pulse (or
/// one non-mutating stage session). `working_dir` is the pulse's worktree
/// for mutating tools, and the repo root for read-only ones.
pub struct ToolContext {
    pub working_dir: std::path::PathBuf,
    pub workflow_id: String,
    pub session_id: String,
    pub pulse_id: Option<String>,
    pub turn_id: Option<String>,
    pub timeout: Option<Duration>,
    pub hook_runner: Option<Arc<PostWriteHookRunner>>,
    pub shell_approval: Option<Arc<ShellApprovalService>>,
    pub repositories: Option<Arc<Repositories>>,
    pub event_bus: Option<Arc<EventBus>>,
}

impl ToolContext {
    pub fn new(working_dir: std::path::PathBuf, workflow_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            working_dir,
            workflow_id: workflow_id.into(),
            session_id: session_id.into(),
            pulse_id: None,
            turn_id: None,
            timeout: None,
            hook_runner: None,
            shell_approval: None,
            repositories: None,
            event_bus: None,
        }
    }

    pub fn with_pulse(mut self, pulse_id: impl Into<String>) -> Self {
        self.pulse_id = Some(pulse_id.into());
        self
    }

    pub fn with_turn(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    pub fn with_hooks(mut self, hook_runner: Arc<PostWriteHookRunner>) -> Self {
        self.hook_runner = Some(hook_runner);
        self
    }

    pub fn with_shell_approval(mut self, shell_approval: Arc<ShellApprovalService>) -> Self {
        self.shell_approval = Some(shell_approval);
        self
    }

    pub fn with_repositories(mut self, repositories: Arc<Repositories>) -> Self {
        self.repositories = Some(repositories);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Resolve and validate a tool-supplied relative path against
    /// `working_dir`, rejecting absolute paths and `..` traversal.
    pub fn resolve_path(&self, path: &str) -> Result<std::path::PathBuf, ToolResult> {
        super::path_utils::validate_path(path, &self.working_dir)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    default_timeout: Duration,
    pre_hooks: Vec<Arc<dyn PreToolHook>>,
    post_hooks: Vec<Arc<dyn PostToolHook>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    pub fn add_pre_hook(&mut self, hook: Arc<dyn PreToolHook>) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_hook(&mut self, hook: Arc<dyn PostToolHook>) {
        self.post_hooks.push(hook);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    pub async fn schemas(&self) -> Vec<(String, String, Value)> {
        self.tools
            .read()
            .await
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string(), t.parameters_schema()))
            .collect()
    }

    /// Execute a registered tool through the pre/post hook chain with a
    /// per-call timeout. Returns `None` only if the tool name is unknown.
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> Option<ToolResult> {
        let tool = self.get(name).await?;
        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        for hook in &self.pre_hooks {
            match hook.before_execute(name, &params, ctx).await {
                HookResult::Continue => {}
                HookResult::Block { reason } => {
                    tracing::info!(tool = name, reason = %reason, "tool blocked by pre-hook");
                    return Some(ToolResult::error_with_code("blocked_by_policy", reason));
                }
            }
        }

        let result = match tokio::time::timeout(timeout, tool.execute(params.clone(), ctx)).await {
            Ok(result) => result,
            Err(_) => ToolResult::error_with_code(
                "timeout",
                format!("Tool '{}' timed out after {}s", name, timeout.as_secs()),
            ),
        };

        let duration = start.elapsed();
        for hook in &self.post_hooks {
            hook.after_execute(name, &params, &result, duration).await;
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::success_data(params)
        }
    }

    struct AlwaysBlock;

    #[async_trait]
    impl PreToolHook for AlwaysBlock {
        async fn before_execute(&self, _name: &str, _params: &Value, _ctx: &ToolContext) -> HookResult {
            HookResult::Block {
                reason: "nope".to_string(),
            }
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(std::path::PathBuf::from("/tmp"), "wf-1", "sess-1")
    }

    #[tokio::test]
    async fn unknown_tool_returns_none() {
        let registry = ToolRegistry::new();
        assert!(registry.execute("nope", json!({}), &ctx()).await.is_none());
    }

    #[tokio::test]
    async fn pre_hook_block_short_circuits_execution() {
        let mut registry = ToolRegistry::new();
        registry.add_pre_hook(Arc::new(AlwaysBlock));
        registry.register(Arc::new(EchoTool)).await;

        let result = registry.execute("echo", json!({}), &ctx()).await.unwrap();
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "blocked_by_policy");
    }

    #[tokio::test]
    async fn successful_execution_runs_post_hooks() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let result = registry
            .execute("echo", json!({"x": 1}), &ctx())
            .await
            .unwrap();
        assert!(!result.is_error);
    }
}

//! Tool registry, path sandboxing, post-write hooks, and every built-in
//! tool implementation available to an agent session.

pub mod hooks;
pub mod implementations;
pub mod path_utils;
pub mod registry;
pub mod truncation;

pub use registry::{parse_params, HookResult, PostToolHook, PreToolHook, Tool, ToolContext, ToolRegistry, ToolResult};

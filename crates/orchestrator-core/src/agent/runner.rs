//! The agent runner: drives one session's conversation loop against an
//! `LlmClient`, persisting every turn/message/thought/tool call and
//! notifying the workflow orchestrator of stage-relevant tool outcomes.
//!
//! Grounded on krusty-core's `agent::orchestrator`/`agent::stream` turn loop
//! (stream → accumulate text/thinking → dispatch one tool call → loop until
//! the model stops), adapted from krusty's single always-on assistant to
//! this crate's many short-lived, role-scoped sessions, and from its
//! LoopEvent/TUI event surface to this crate's persistence-first,
//! EventBus-broadcast model (spec.md §4.7).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::llm::{AgentMessage, FinishReason, LlmClient, StreamPart, ToolSpec};
use crate::agent::registry::AgentRoleRegistry;
use crate::data::{ContextType, Session, ToolCallStatus, TurnRole};
use crate::events::{Event, EventBus, EventType};
use crate::session_manager::{CancellationHandle, SessionManager};
use crate::shell_approval::ShellApprovalService;
use crate::storage::Repositories;
use crate::tools::{ToolContext, ToolRegistry, ToolResult};
use crate::tools::hooks::PostWriteHookRunner;

/// Tool names whose success the workflow orchestrator needs to hear about
/// immediately (`handleToolResult`), rather than only at the end of the
/// turn (spec.md §4.8's `APPROVAL_REQUIRED_TOOLS`). `complete_pulse` is
/// deliberately excluded: it is a deferred tool, surfaced only through
/// `handle_turn_completion`'s `succeeded_tools` list (spec.md §4.7 step 5 /
/// §9). `WorkflowOrchestrator::handle_tool_result` still has a
/// `complete_pulse` branch for legacy call sites, but the runner must never
/// route it there during normal operation.
pub const STAGE_COMPLETION_TOOLS: &[&str] =
    &["submit_scope", "submit_research", "submit_plan", "complete_review"];

/// Callbacks the workflow orchestrator implements so the runner can report
/// back without holding a direct reference to it (spec.md §4.7 point 5).
#[async_trait]
pub trait WorkflowCallbacks: Send + Sync {
    async fn handle_tool_result(&self, workflow_id: &str, tool_name: &str, result: &ToolResult);
    async fn handle_turn_completion(&self, workflow_id: &str, succeeded_tools: Vec<String>);
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub struct RunnerServices {
    pub tool_registry: Arc<ToolRegistry>,
    pub repositories: Arc<Repositories>,
    pub event_bus: Arc<EventBus>,
    pub llm: Arc<dyn LlmClient>,
    pub roles: Arc<AgentRoleRegistry>,
    pub session_manager: Arc<SessionManager>,
}

pub struct RunnerConfig {
    pub working_dir: PathBuf,
    pub hook_runner: Option<Arc<PostWriteHookRunner>>,
    pub shell_approval: Option<Arc<ShellApprovalService>>,
    pub callbacks: Option<Arc<dyn WorkflowCallbacks>>,
}

pub struct RunOptions {
    pub hidden: bool,
    pub cancellation: CancellationHandle,
}

pub struct AgentRunner {
    services: RunnerServices,
    config: RunnerConfig,
}

impl AgentRunner {
    pub fn new(services: RunnerServices, config: RunnerConfig) -> Self {
        Self { services, config }
    }

    /// Fire-and-forget launch: spawns the run and returns immediately
    /// (spec.md §4.7's non-blocking launch requirement). On any error the
    /// session is marked errored through `SessionManager::error_session`.
    pub fn launch(self: Arc<Self>, session: Session, user_message: String, options: RunOptions) {
        tokio::spawn(async move {
            let session_id = session.id.clone();
            if let Err(e) = self.run(&session, user_message, options).await {
                tracing::error!(session_id = %session_id, error = %e, "agent run failed");
                if let Err(e) = self.services.session_manager.error_session(&session_id, &e.to_string()).await {
                    tracing::error!(session_id = %session_id, error = %e, "failed to mark session errored");
                }
            }
        });
    }

    async fn run(&self, session: &Session, user_message: String, options: RunOptions) -> Result<(), RunnerError> {
        let repos = &self.services.repositories;
        let bus = &self.services.event_bus;
        let role_config = self.services.roles.config_for(session.agent_role);

        let user_turn = repos.conversation.create_turn(&session.id, TurnRole::User, options.hidden)?;
        repos.conversation.save_message(&user_turn.id, 0, &user_message)?;
        repos.conversation.complete_turn(&user_turn.id, None, None)?;

        let assistant_turn = repos.conversation.create_turn(&session.id, TurnRole::Assistant, options.hidden)?;
        bus.broadcast(Event {
            event_type: EventType::TurnStarted,
            payload: serde_json::json!({"session_id": session.id, "turn_id": assistant_turn.id}),
        });

        let history = repos.conversation.load_session_context(&session.id)?;
        let mut messages = build_messages(role_config, &history, &user_message);
        let tool_specs = self.tool_specs_for(role_config).await;

        let mut segment_index: i64 = 0;
        let mut tool_index: i64 = 0;
        let mut succeeded_tools: Vec<String> = Vec::new();
        let mut workflow_notify: Option<(String, String, ToolResult)> = None;

        'turn: loop {
            if options.cancellation.is_cancelled() {
                break;
            }

            let mut rx = self.services.llm.call_streaming(messages.clone(), tool_specs.clone()).await;
            let mut text_buffer = String::new();
            let mut proposed_call = None;
            let mut finish = FinishReason::Stop;

            while let Some(part) = rx.recv().await {
                if options.cancellation.is_cancelled() {
                    break;
                }
                match part {
                    StreamPart::TextDelta(delta) => {
                        text_buffer.push_str(&delta);
                        bus.broadcast(Event {
                            event_type: EventType::TurnMessageDelta,
                            payload: serde_json::json!({"session_id": session.id, "turn_id": assistant_turn.id, "delta": delta}),
                        });
                    }
                    StreamPart::ThoughtDelta(delta) => {
                        bus.broadcast(Event {
                            event_type: EventType::TurnThoughtDelta,
                            payload: serde_json::json!({"session_id": session.id, "turn_id": assistant_turn.id, "delta": delta}),
                        });
                    }
                    StreamPart::ToolCall(call) => {
                        proposed_call = Some(call);
                        finish = FinishReason::ToolCall;
                        break;
                    }
                    StreamPart::End { finish_reason } => {
                        finish = finish_reason;
                        break;
                    }
                }
            }

            if !text_buffer.is_empty() {
                repos.conversation.save_message(&assistant_turn.id, segment_index, &text_buffer)?;
                segment_index += 1;
                messages.push(AgentMessage::assistant(text_buffer));
            }
            bus.broadcast(Event {
                event_type: EventType::TurnSegmentComplete,
                payload: serde_json::json!({"session_id": session.id, "turn_id": assistant_turn.id}),
            });

            if options.cancellation.is_cancelled() {
                break 'turn;
            }

            let Some(call) = proposed_call else {
                let _ = finish;
                break 'turn;
            };

            if !role_config.allowed_tools.iter().any(|t| t == &call.name) {
                let denial = ToolResult::error_with_code(
                    "access_denied",
                    format!("tool '{}' is not available to the {} role", call.name, session.agent_role.as_str()),
                );
                let tc = repos.conversation.record_tool_start(&assistant_turn.id, tool_index, &call.name, None, call.arguments.clone())?;
                tool_index += 1;
                repos.conversation.record_tool_complete(&tc.id, &denial.output, ToolCallStatus::Error)?;
                messages.push(AgentMessage::tool_result(call.id.clone(), call.name.clone(), denial.output));
                continue 'turn;
            }

            let tc = repos.conversation.record_tool_start(&assistant_turn.id, tool_index, &call.name, None, call.arguments.clone())?;
            tool_index += 1;
            bus.broadcast(Event {
                event_type: EventType::TurnToolStarted,
                payload: serde_json::json!({"session_id": session.id, "tool_call_id": tc.id, "tool_name": call.name}),
            });

            let ctx = self.tool_context(session, Some(assistant_turn.id.clone()));
            let result = self
                .services
                .tool_registry
                .execute(&call.name, call.arguments.clone(), &ctx)
                .await
                .unwrap_or_else(|| ToolResult::error_with_code("unknown_tool", format!("Unknown tool: {}", call.name)));

            let status = if result.is_error { ToolCallStatus::Error } else { ToolCallStatus::Completed };
            repos.conversation.record_tool_complete(&tc.id, &result.output, status)?;
            bus.broadcast(Event {
                event_type: EventType::TurnToolCompleted,
                payload: serde_json::json!({"session_id": session.id, "tool_call_id": tc.id, "tool_name": call.name, "is_error": result.is_error}),
            });

            if !result.is_error {
                succeeded_tools.push(call.name.clone());
                if session.context_type == ContextType::Workflow && STAGE_COMPLETION_TOOLS.contains(&call.name.as_str()) {
                    workflow_notify = Some((ctx.workflow_id.clone(), call.name.clone(), result.clone()));
                }
            }

            messages.push(AgentMessage::tool_result(call.id.clone(), call.name.clone(), result.output.clone()));
        }

        repos.conversation.complete_turn(&assistant_turn.id, None, None)?;
        bus.broadcast(Event {
            event_type: EventType::TurnCompleted,
            payload: serde_json::json!({"session_id": session.id, "turn_id": assistant_turn.id}),
        });

        if let Some(callbacks) = &self.config.callbacks {
            if let Some((workflow_id, tool_name, result)) = workflow_notify {
                callbacks.handle_tool_result(&workflow_id, &tool_name, &result).await;
            }
            if session.context_type == ContextType::Workflow {
                callbacks.handle_turn_completion(&session.context_id, succeeded_tools).await;
            }
        }

        if options.cancellation.is_cancelled() {
            self.services.session_manager.stop_session(&session.id).await.ok();
        } else {
            self.services.session_manager.complete_session(&session.id).await.ok();
        }

        Ok(())
    }

    fn tool_context(&self, session: &Session, turn_id: Option<String>) -> ToolContext {
        let workflow_id = match session.context_type {
            ContextType::Workflow => session.context_id.clone(),
            ContextType::Channel => format!("channel:{}", session.context_id),
        };

        let mut ctx = ToolContext::new(self.config.working_dir.clone(), workflow_id, session.id.clone())
            .with_repositories(self.services.repositories.clone())
            .with_event_bus(self.services.event_bus.clone());

        if let Some(turn_id) = turn_id {
            ctx = ctx.with_turn(turn_id);
        }
        if let Some(pulse_id) = &session.pulse_id {
            ctx = ctx.with_pulse(pulse_id.clone());
        }
        if let Some(hooks) = &self.config.hook_runner {
            ctx = ctx.with_hooks(hooks.clone());
        }
        if let Some(approval) = &self.config.shell_approval {
            ctx = ctx.with_shell_approval(approval.clone());
        }

        ctx
    }

    async fn tool_specs_for(&self, role_config: &crate::agent::registry::AgentRoleConfig) -> Vec<ToolSpec> {
        let schemas = self.services.tool_registry.schemas().await;
        schemas
            .into_iter()
            .filter(|(name, _, _)| role_config.allowed_tools.iter().any(|t| t == name))
            .map(|(name, description, parameters_schema)| ToolSpec { name, description, parameters_schema })
            .collect()
    }
}

fn build_messages(
    role_config: &crate::agent::registry::AgentRoleConfig,
    history: &[crate::storage::TurnWithChildren],
    user_message: &str,
) -> Vec<AgentMessage> {
    let mut messages = vec![AgentMessage::system(role_config.persona_prompt.clone())];

    for turn in history {
        let role = match turn.turn.role {
            TurnRole::User => crate::agent::llm::MessageRole::User,
            TurnRole::Assistant => crate::agent::llm::MessageRole::Assistant,
        };
        for message in &turn.messages {
            messages.push(AgentMessage::Text { role, content: message.text.clone() });
        }
        for tool_call in &turn.tool_calls {
            if let Some(output) = &tool_call.output {
                messages.push(AgentMessage::tool_result(tool_call.id.clone(), tool_call.tool_name.clone(), output.clone()));
            }
        }
    }

    messages.push(AgentMessage::user(user_message.to_string()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{ScriptedLlmClient, ScriptedResponse};
    use crate::data::{AgentRole, ContextType};
    use crate::storage::Database;
    use crate::tools::implementations::register_base_tools;

    async fn services(llm: Arc<dyn LlmClient>) -> (RunnerServices, Arc<Repositories>) {
        let repositories = Arc::new(Repositories::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(ToolRegistry::new());
        register_base_tools(&registry).await;

        let session_manager = Arc::new(SessionManager::new(repositories.clone()));

        (
            RunnerServices {
                tool_registry: registry,
                repositories: repositories.clone(),
                event_bus: Arc::new(EventBus::new()),
                llm,
                roles: Arc::new(AgentRoleRegistry::standard()),
                session_manager,
            },
            repositories,
        )
    }

    #[tokio::test]
    async fn text_only_reply_persists_one_segment_and_completes() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::text("all good")]));
        let (services, repositories) = services(llm).await;

        let session = Session::new(ContextType::Channel, "chan-1", AgentRole::Discussion);
        repositories.sessions.create(&session).unwrap();

        let runner = Arc::new(AgentRunner::new(
            services,
            RunnerConfig {
                working_dir: PathBuf::from("/tmp"),
                hook_runner: None,
                shell_approval: None,
                callbacks: None,
            },
        ));

        runner
            .run(&session, "hello".to_string(), RunOptions { hidden: false, cancellation: CancellationHandle::new() })
            .await
            .unwrap();

        let history = repositories.conversation.get_history(&session.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].messages.len(), 1);
        assert_eq!(history[1].messages[0].text, "all good");
    }

    #[tokio::test]
    async fn disallowed_tool_is_rejected_without_executing() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            ScriptedResponse::tool_call("1", "write_file", serde_json::json!({"path": "a.rs", "content": "x"})),
            ScriptedResponse::text("ok"),
        ]));
        let (services, repositories) = services(llm).await;

        let session = Session::new(ContextType::Channel, "chan-1", AgentRole::Discussion);
        repositories.sessions.create(&session).unwrap();

        let runner = Arc::new(AgentRunner::new(
            services,
            RunnerConfig { working_dir: PathBuf::from("/tmp"), hook_runner: None, shell_approval: None, callbacks: None },
        ));

        runner
            .run(&session, "please write a file".to_string(), RunOptions { hidden: false, cancellation: CancellationHandle::new() })
            .await
            .unwrap();

        let history = repositories.conversation.get_history(&session.id).unwrap();
        let tool_calls = &history[1].tool_calls;
        assert_eq!(tool_calls.len(), 1);
        assert!(matches!(tool_calls[0].status, ToolCallStatus::Error));
    }

    #[tokio::test]
    async fn cancellation_mid_stream_stops_the_turn() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::text("won't be seen")]));
        let (services, repositories) = services(llm).await;

        let session = Session::new(ContextType::Channel, "chan-1", AgentRole::Discussion);
        repositories.sessions.create(&session).unwrap();

        let runner = Arc::new(AgentRunner::new(
            services,
            RunnerConfig { working_dir: PathBuf::from("/tmp"), hook_runner: None, shell_approval: None, callbacks: None },
        ));

        let cancellation = CancellationHandle::new();
        cancellation.cancel();

        runner
            .run(&session, "hello".to_string(), RunOptions { hidden: false, cancellation })
            .await
            .unwrap();

        let history = repositories.conversation.get_history(&session.id).unwrap();
        assert!(history[1].messages.is_empty());
    }
}

//! Vendor-agnostic streaming LLM abstraction.
//!
//! Grounded on krusty-core's `ai::streaming::StreamPart` /
//! `AiClient::call_streaming` (an `mpsc::UnboundedReceiver<StreamPart>`
//! consumed by `agent::stream::process_stream`), narrowed to the handful of
//! part kinds the agent runner needs. Concrete vendor SDKs are out of scope
//! here; the only implementation in this crate is the deterministic
//! `ScriptedLlmClient` test double below.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One entry of conversation history handed to the model on each call.
#[derive(Debug, Clone)]
pub enum AgentMessage {
    Text { role: MessageRole, content: String },
    ToolResult { tool_call_id: String, name: String, output: String },
}

impl AgentMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::Text { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::Text { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Text { role: MessageRole::Assistant, content: content.into() }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolResult { tool_call_id: tool_call_id.into(), name: name.into(), output: output.into() }
    }
}

/// A tool made visible to the model for one `call_streaming` invocation.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCall,
    Cancelled,
}

/// A proposed tool invocation the model wants executed.
#[derive(Debug, Clone)]
pub struct ProposedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One chunk of a streaming model response.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextDelta(String),
    ThoughtDelta(String),
    ToolCall(ProposedToolCall),
    End { finish_reason: FinishReason },
}

/// A streaming chat completion backend. The agent runner drives one call
/// per turn segment: each call either ends in `FinishReason::Stop` (the
/// turn is over) or surfaces exactly one `StreamPart::ToolCall` followed by
/// `FinishReason::ToolCall` (the runner executes it and calls again with
/// the tool result appended to history).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call_streaming(
        &self,
        messages: Vec<AgentMessage>,
        tools: Vec<ToolSpec>,
    ) -> mpsc::UnboundedReceiver<StreamPart>;
}

/// A pre-scripted response for one `call_streaming` invocation.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub parts: Vec<StreamPart>,
}

impl ScriptedResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![
                StreamPart::TextDelta(text.into()),
                StreamPart::End { finish_reason: FinishReason::Stop },
            ],
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            parts: vec![
                StreamPart::ToolCall(ProposedToolCall { id: id.into(), name: name.into(), arguments }),
                StreamPart::End { finish_reason: FinishReason::ToolCall },
            ],
        }
    }
}

/// Deterministic test double: replays a fixed queue of scripted responses,
/// one per `call_streaming` call. Falls back to an immediate stop once the
/// queue is drained, so a runner under test never hangs waiting on a part
/// that will never arrive.
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<ScriptedResponse>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn call_streaming(
        &self,
        _messages: Vec<AgentMessage>,
        _tools: Vec<ToolSpec>,
    ) -> mpsc::UnboundedReceiver<StreamPart> {
        let (tx, rx) = mpsc::unbounded_channel();

        let next = self.responses.lock().expect("scripted llm mutex poisoned").pop_front();
        let parts = next.map(|r| r.parts).unwrap_or_else(|| vec![StreamPart::End { finish_reason: FinishReason::Stop }]);

        for part in parts {
            let _ = tx.send(part);
        }

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_responses_in_order() {
        let client = ScriptedLlmClient::new(vec![
            ScriptedResponse::tool_call("1", "read_file", serde_json::json!({"path": "a.rs"})),
            ScriptedResponse::text("done"),
        ]);

        let mut rx = client.call_streaming(vec![], vec![]).await;
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StreamPart::ToolCall(_)));

        let mut rx2 = client.call_streaming(vec![], vec![]).await;
        let first2 = rx2.recv().await.unwrap();
        assert!(matches!(first2, StreamPart::TextDelta(_)));
    }

    #[tokio::test]
    async fn drained_queue_yields_an_immediate_stop() {
        let client = ScriptedLlmClient::new(vec![]);
        let mut rx = client.call_streaming(vec![], vec![]).await;
        let part = rx.recv().await.unwrap();
        assert!(matches!(part, StreamPart::End { finish_reason: FinishReason::Stop }));
    }
}

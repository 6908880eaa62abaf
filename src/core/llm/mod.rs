pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a conversation turn. `Tool` carries a tool invocation result
/// back into the conversation before the second completion round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    ToolCall { name: String, args: Value },
    ToolResult { name: String, output: String },
}

/// One exchange in a conversation. History is round-tripped through the
/// caller, so turns must serialize cleanly; there is no server-side session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    #[serde(flatten)]
    pub content: TurnContent,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text { text: text.into() },
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: TurnContent::Text { text: text.into() },
        }
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            role: Role::Model,
            content: TurnContent::ToolCall {
                name: name.into(),
                args,
            },
        }
    }

    pub fn tool_result(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: TurnContent::ToolResult {
                name: name.into(),
                output: output.into(),
            },
        }
    }
}

/// Declaration of a callable tool, included in the completion request so the
/// model can emit a matching call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_output_tokens: 250,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub turns: Vec<ChatTurn>,
    pub tools: Vec<ToolSpec>,
    pub params: GenerationParams,
}

/// The four distinct things a completion call can come back with. Success
/// with empty content (safety filtering), success with a tool call, success
/// with text, and HTTP-level failure are semantically different outcomes and
/// are never collapsed into one another.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Text(String),
    ToolCall {
        name: String,
        args: Value,
    },
    Blocked(String),
    ProviderError {
        status: Option<u16>,
        message: String,
    },
}

/// A single request/response exchange with the hosted model. No retries at
/// this layer: a repeated call could duplicate tool side effects, so a failed
/// exchange is surfaced to the caller as-is.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, api_key: &str, request: &CompletionRequest) -> CompletionOutcome;

    /// Human-readable label of the backing provider, reported in replies.
    fn provider_label(&self) -> String;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted completion client: pops outcomes in order and counts calls.
    pub struct ScriptedClient {
        outcomes: Mutex<Vec<CompletionOutcome>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        pub fn new(mut outcomes: Vec<CompletionOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _api_key: &str, _request: &CompletionRequest) -> CompletionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(CompletionOutcome::ProviderError {
                    status: None,
                    message: "scripted client ran out of outcomes".to_string(),
                })
        }

        fn provider_label(&self) -> String {
            "Scripted (test)".to_string()
        }
    }
}

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::agents::{AgentProfile, AgentRoster};
use super::credentials::{Capability, CredentialStore};
use super::llm::{ChatTurn, CompletionClient, CompletionOutcome, CompletionRequest, GenerationParams};
use super::tools::{ToolError, ToolRegistry};

/// Why a message ended in a degraded reply instead of a genuine answer.
/// Rendered into user-facing text only here, at the outermost layer.
#[derive(Debug)]
pub enum FallbackReason {
    NotConfigured,
    Provider { status: Option<u16>, message: String },
    Blocked(String),
    ToolFailed(ToolError),
    Internal(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NotConfigured => write!(f, "Gemini API key not configured"),
            FallbackReason::Provider {
                status: Some(code),
                message,
            } => write!(f, "Gemini API error (code {code}): {message}"),
            FallbackReason::Provider { status: None, message } => {
                write!(f, "Gemini API error: {message}")
            }
            FallbackReason::Blocked(reason) => {
                write!(f, "response blocked or empty ({reason}); try rephrasing")
            }
            FallbackReason::ToolFailed(e) => write!(f, "{e}"),
            FallbackReason::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

/// What the chat endpoint hands back to the caller: who answered, with what
/// text, whether the call chain fully succeeded, and the updated history for
/// the caller to keep.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub agent: String,
    pub text: String,
    pub provider: String,
    pub success: bool,
    pub turns: Vec<ChatTurn>,
}

const FALLBACK_PROVIDER: &str = "Demo mode (Gemini unavailable)";

/// Owns the per-message control loop: credential resolution, first
/// completion round, at most one tool round, second completion round, and
/// outcome normalization. All collaborators are injected at startup.
pub struct AgentOrchestrator {
    roster: AgentRoster,
    credentials: Arc<CredentialStore>,
    client: Arc<dyn CompletionClient>,
    tools: Arc<ToolRegistry>,
}

impl AgentOrchestrator {
    pub fn new(
        roster: AgentRoster,
        credentials: Arc<CredentialStore>,
        client: Arc<dyn CompletionClient>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            roster,
            credentials,
            client,
            tools,
        }
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    /// Process one inbound message. Every failure inside the loop terminates
    /// in a well-formed degraded reply; nothing propagates to the caller.
    pub async fn respond(
        &self,
        agent_id: &str,
        message: &str,
        history: Vec<ChatTurn>,
    ) -> AgentReply {
        let agent = self.roster.get_or_default(agent_id);

        let mut turns = history;
        turns.push(ChatTurn::user(message));

        let api_key = match self.credentials.resolve(Capability::Llm).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                info!("No Gemini credential; {} answers in degraded mode", agent.name);
                return fallback(agent, FallbackReason::NotConfigured, turns);
            }
            Err(e) => {
                warn!("Credential lookup failed: {}", e);
                return fallback(agent, FallbackReason::Internal(e.to_string()), turns);
            }
        };

        let tool_specs = self.tools.specs_for(&agent.allowed_tools);
        let request = CompletionRequest {
            system_prompt: agent.system_prompt(),
            turns: turns.clone(),
            tools: tool_specs.clone(),
            params: GenerationParams::default(),
        };

        match self.client.complete(&api_key, &request).await {
            CompletionOutcome::Text(text) => {
                turns.push(ChatTurn::model(&text));
                self.success(agent, text, turns)
            }
            CompletionOutcome::ToolCall { name, args } => {
                self.tool_round(agent, &api_key, name, args, tool_specs, turns)
                    .await
            }
            CompletionOutcome::Blocked(reason) => {
                fallback(agent, FallbackReason::Blocked(reason), turns)
            }
            CompletionOutcome::ProviderError { status, message } => {
                fallback(agent, FallbackReason::Provider { status, message }, turns)
            }
        }
    }

    /// Exactly one tool round per message: execute the requested tool, feed
    /// its output back, and require plain text from the second round. There
    /// is no third upstream call.
    async fn tool_round(
        &self,
        agent: &AgentProfile,
        api_key: &str,
        name: String,
        args: Value,
        tool_specs: Vec<super::llm::ToolSpec>,
        mut turns: Vec<ChatTurn>,
    ) -> AgentReply {
        info!("{} requested tool '{}'", agent.name, name);
        turns.push(ChatTurn::tool_call(&name, args.clone()));

        let output = match self.tools.invoke(&name, &args).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool '{}' failed: {}", name, e);
                return fallback(agent, FallbackReason::ToolFailed(e), turns);
            }
        };
        turns.push(ChatTurn::tool_result(&name, &output));

        let request = CompletionRequest {
            system_prompt: agent.system_prompt(),
            turns: turns.clone(),
            tools: tool_specs,
            params: GenerationParams::default(),
        };

        match self.client.complete(api_key, &request).await {
            CompletionOutcome::Text(text) => {
                turns.push(ChatTurn::model(&text));
                self.success(agent, text, turns)
            }
            CompletionOutcome::Blocked(reason) => {
                fallback(agent, FallbackReason::Blocked(reason), turns)
            }
            CompletionOutcome::ProviderError { status, message } => {
                fallback(agent, FallbackReason::Provider { status, message }, turns)
            }
            CompletionOutcome::ToolCall { name, .. } => {
                // The model asked for another round; the loop is bounded at
                // one, so this terminates the message instead.
                warn!("Second completion round requested tool '{}'; refusing", name);
                fallback(
                    agent,
                    FallbackReason::Blocked("model requested a second tool call".to_string()),
                    turns,
                )
            }
        }
    }

    fn success(&self, agent: &AgentProfile, text: String, turns: Vec<ChatTurn>) -> AgentReply {
        AgentReply {
            agent: agent.name.to_string(),
            text,
            provider: self.client.provider_label(),
            success: true,
            turns,
        }
    }
}

fn fallback(agent: &AgentProfile, reason: FallbackReason, turns: Vec<ChatTurn>) -> AgentReply {
    AgentReply {
        agent: agent.name.to_string(),
        text: format!("{} ({reason})", agent.fallback_line),
        provider: FALLBACK_PROVIDER.to_string(),
        success: false,
        turns,
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, warn};

use super::{
    ChatTurn, CompletionClient, CompletionOutcome, CompletionRequest, Role, ToolSpec, TurnContent,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Upper bound on one generateContent exchange. A timed-out call surfaces as
/// a ProviderError; it is never retried here.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiToolDecl>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolDecl {
    function_declarations: Vec<GeminiFunctionDecl>,
}

#[derive(Serialize)]
struct GeminiFunctionDecl {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    error: Option<GeminiErrorDetail>,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: String,
}

pub struct GeminiClient {
    http: Client,
    model: String,
}

impl GeminiClient {
    pub fn new(model: &str) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            model: model.to_string(),
        }
    }

    fn build_payload(&self, request: &CompletionRequest) -> GeminiRequest {
        let system_instruction = if request.system_prompt.is_empty() {
            None
        } else {
            Some(GeminiContent {
                // Role is ignored for systemInstruction but required by the shape.
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: Some(request.system_prompt.clone()),
                    ..Default::default()
                }],
            })
        };

        let contents = request.turns.iter().map(turn_to_content).collect();

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiToolDecl {
                function_declarations: request.tools.iter().map(spec_to_decl).collect(),
            }]
        };

        GeminiRequest {
            system_instruction,
            contents,
            tools,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.params.max_output_tokens,
                temperature: request.params.temperature,
            },
        }
    }
}

fn spec_to_decl(spec: &ToolSpec) -> GeminiFunctionDecl {
    GeminiFunctionDecl {
        name: spec.name.clone(),
        description: spec.description.clone(),
        parameters: spec.parameters.clone(),
    }
}

fn turn_to_content(turn: &ChatTurn) -> GeminiContent {
    match (&turn.role, &turn.content) {
        (Role::Model, TurnContent::ToolCall { name, args }) => GeminiContent {
            role: "model".to_string(),
            parts: vec![GeminiPart {
                function_call: Some(GeminiFunctionCall {
                    name: name.clone(),
                    args: args.clone(),
                }),
                ..Default::default()
            }],
        },
        (_, TurnContent::ToolResult { name, output }) => GeminiContent {
            role: "function".to_string(),
            parts: vec![GeminiPart {
                function_response: Some(GeminiFunctionResponse {
                    name: name.clone(),
                    // functionResponse.response must be a JSON object.
                    response: json!({ "result": output }),
                }),
                ..Default::default()
            }],
        },
        (role, TurnContent::Text { text }) => GeminiContent {
            role: match role {
                Role::Model => "model".to_string(),
                _ => "user".to_string(),
            },
            parts: vec![GeminiPart {
                text: Some(text.clone()),
                ..Default::default()
            }],
        },
        // A tool call attributed to anything but the model has no wire shape;
        // carry it as user text so the request stays well-formed.
        (_, TurnContent::ToolCall { name, .. }) => GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart {
                text: Some(format!("[tool call: {name}]")),
                ..Default::default()
            }],
        },
    }
}

/// Map a decoded generateContent body to the normalized outcome. Empty or
/// part-less candidates mean the reply was filtered; the block reason (when
/// present) is carried through for diagnosis.
fn outcome_from_response(response: GeminiResponse) -> CompletionOutcome {
    if let Some(candidate) = response.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            for part in &content.parts {
                if let Some(call) = &part.function_call {
                    return CompletionOutcome::ToolCall {
                        name: call.name.clone(),
                        args: call.args.clone(),
                    };
                }
            }
            let text: String = content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("");
            if !text.trim().is_empty() {
                return CompletionOutcome::Text(text.trim().to_string());
            }
        }
        if let Some(reason) = candidate.finish_reason
            && reason != "STOP"
        {
            return CompletionOutcome::Blocked(format!("finish reason: {reason}"));
        }
    } else if let Some(feedback) = response.prompt_feedback
        && let Some(reason) = feedback.block_reason
    {
        return CompletionOutcome::Blocked(format!("block reason: {reason}"));
    }
    CompletionOutcome::Blocked("empty response".to_string())
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, api_key: &str, request: &CompletionRequest) -> CompletionOutcome {
        let url = format!(
            "{GEMINI_API_BASE}/{}:generateContent?key={api_key}",
            self.model
        );
        let payload = self.build_payload(request);

        let response = match self.http.post(&url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("request timed out after {}s", REQUEST_TIMEOUT.as_secs())
                } else {
                    e.to_string()
                };
                error!("Gemini request failed: {}", message);
                return CompletionOutcome::ProviderError {
                    status: None,
                    message,
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("HTTP {status}"));
            error!("Gemini error (HTTP {}): {}", status.as_u16(), message);
            return CompletionOutcome::ProviderError {
                status: Some(status.as_u16()),
                message,
            };
        }

        match response.json::<GeminiResponse>().await {
            Ok(body) => {
                let outcome = outcome_from_response(body);
                if let CompletionOutcome::Blocked(reason) = &outcome {
                    warn!("Gemini reply blocked or empty: {}", reason);
                }
                outcome
            }
            Err(e) => CompletionOutcome::ProviderError {
                status: Some(status.as_u16()),
                message: format!("unexpected response shape: {e}"),
            },
        }
    }

    fn provider_label(&self) -> String {
        format!("Google Gemini ({})", self.model)
    }
}

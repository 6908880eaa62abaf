use axum::{Json, extract::State};
use serde_json::{Value, json};
use tracing::{error, warn};

use super::super::AppState;
use crate::core::credentials::Capability;
use crate::core::llm::{ChatTurn, CompletionOutcome, CompletionRequest, GenerationParams};

const SUPPORTED_PROVIDERS: [&str; 2] = ["gemini", "gmail"];

#[derive(serde::Deserialize)]
pub struct SaveKeyRequest {
    provider: String,
    api_key: String,
}

/// Administrative upsert for a provider secret. The hot path never writes
/// here; the settings UI does.
pub async fn save_key_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<SaveKeyRequest>,
) -> Json<Value> {
    let provider = payload.provider.to_lowercase();
    if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
        return Json(json!({
            "success": false,
            "message": format!("Unsupported provider '{provider}'"),
        }));
    }
    if payload.api_key.is_empty() {
        return Json(json!({ "success": false, "message": "API key required" }));
    }

    match state.credentials.save_key(&provider, &payload.api_key).await {
        Ok(()) => Json(json!({
            "success": true,
            "message": format!("Key for {provider} saved. Run a test to verify it."),
        })),
        Err(e) => {
            error!("Key save failed: {}", e);
            Json(json!({ "success": false, "message": e.to_string() }))
        }
    }
}

pub async fn key_status_endpoint(State(state): State<AppState>) -> Json<Value> {
    let gemini = state.credentials.status(Capability::Llm).await;
    let gmail = state.credentials.status(Capability::Mailer).await;

    match (gemini, gmail) {
        (Ok(gemini), Ok(gmail)) => Json(json!({
            "success": true,
            "apis": { "gemini": gemini, "gmail": gmail },
        })),
        (Err(e), _) | (_, Err(e)) => {
            error!("Key status lookup failed: {}", e);
            Json(json!({ "success": false, "message": e.to_string() }))
        }
    }
}

/// Live probe of the completion provider with a minimal prompt, recording
/// the result on the key row.
pub async fn test_key_endpoint(State(state): State<AppState>) -> Json<Value> {
    let api_key = match state.credentials.resolve(Capability::Llm).await {
        Ok(Some(key)) => key,
        Ok(None) => {
            if let Err(e) = state.credentials.record_test("gemini", "missing").await {
                warn!("Could not record key test result: {}", e);
            }
            return Json(json!({
                "success": false,
                "message": "Gemini API key not found",
            }));
        }
        Err(e) => return Json(json!({ "success": false, "message": e.to_string() })),
    };

    let request = CompletionRequest {
        system_prompt: String::new(),
        turns: vec![ChatTurn::user("Say 'OK' and nothing else.")],
        tools: vec![],
        params: GenerationParams {
            max_output_tokens: 10,
            temperature: 0.0,
        },
    };

    let (passed, message) = match state.completion.complete(&api_key, &request).await {
        CompletionOutcome::Text(text) if text.to_uppercase().contains("OK") => {
            (true, "Gemini API is working.".to_string())
        }
        CompletionOutcome::Text(text) => (false, format!("Unexpected reply: {text}")),
        CompletionOutcome::ToolCall { name, .. } => {
            (false, format!("Unexpected tool call: {name}"))
        }
        CompletionOutcome::Blocked(reason) => (false, format!("Reply blocked: {reason}")),
        CompletionOutcome::ProviderError { status, message } => (
            false,
            match status {
                Some(code) => format!("Gemini API error (code {code}): {message}"),
                None => format!("Gemini API error: {message}"),
            },
        ),
    };

    if let Err(e) = state
        .credentials
        .record_test("gemini", if passed { "success" } else { "error" })
        .await
    {
        warn!("Could not record key test result: {}", e);
    }

    Json(json!({ "success": passed, "message": message }))
}

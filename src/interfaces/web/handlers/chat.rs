use axum::{Json, extract::State};
use serde_json::{Value, json};
use tracing::info;

use super::super::AppState;
use crate::core::agents::DEFAULT_AGENT;
use crate::core::llm::ChatTurn;

#[derive(serde::Deserialize)]
pub struct ChatRequest {
    message: String,
    #[serde(default)]
    agent: Option<String>,
    /// Prior turns, round-tripped through the caller. The server keeps no
    /// session state.
    #[serde(default)]
    history: Vec<ChatTurn>,
}

pub async fn chat_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Json<Value> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Json(json!({ "success": false, "error": "Empty message" }));
    }

    let agent = payload.agent.as_deref().unwrap_or(DEFAULT_AGENT);
    info!("Chat message routed to agent [{}]", agent);

    let reply = state
        .orchestrator
        .respond(agent, message, payload.history)
        .await;

    Json(json!({
        "success": true,
        "agent": reply.agent,
        "response": reply.text,
        "provider": reply.provider,
        "api_working": reply.success,
        "history": reply.turns,
    }))
}

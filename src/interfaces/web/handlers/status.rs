use axum::{Json, extract::State};
use serde_json::{Value, json};

use super::super::AppState;

pub async fn status_endpoint(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "agents": state.orchestrator.roster().ids(),
        "provider": state.completion.provider_label(),
    }))
}

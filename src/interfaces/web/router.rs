use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{chat, keys, status};

/// Browser clients are the local UI only, so CORS is pinned to localhost
/// origins for the serving port.
pub fn build_localhost_cors(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{port}"),
        format!("http://localhost:{port}"),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status::status_endpoint))
        .route("/api/chat", post(chat::chat_endpoint))
        .route(
            "/api/keys",
            get(keys::key_status_endpoint).post(keys::save_key_endpoint),
        )
        .route("/api/keys/test", post(keys::test_key_endpoint))
        .with_state(state)
}

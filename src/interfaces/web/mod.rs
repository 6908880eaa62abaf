mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::core::credentials::CredentialStore;
use crate::core::ledger::TaskLedger;
use crate::core::llm::CompletionClient;
use crate::core::orchestrator::AgentOrchestrator;

pub use router::{build_api_router, build_localhost_cors};

/// Everything the handlers need, built once at startup and injected.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AgentOrchestrator>,
    pub credentials: Arc<CredentialStore>,
    pub ledger: Arc<TaskLedger>,
    pub completion: Arc<dyn CompletionClient>,
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let router = build_api_router(state).layer(build_localhost_cors(port));
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("API listening on {}:{}", host, port);
    axum::serve(listener, router).await?;
    Ok(())
}

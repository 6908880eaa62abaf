use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower::ServiceExt;

use tidecrew::core::agents::AgentRoster;
use tidecrew::core::credentials::CredentialStore;
use tidecrew::core::ledger::TaskLedger;
use tidecrew::core::llm::{
    CompletionClient, CompletionOutcome, CompletionRequest,
};
use tidecrew::core::mail::{MailGateway, MailboxSummary, OutboundEmail, SendError};
use tidecrew::core::orchestrator::AgentOrchestrator;
use tidecrew::core::tools::{CalendarTool, EmailAlertTool, MailSearchTool, ToolRegistry};
use tidecrew::interfaces::web::{AppState, build_api_router};

/// Scripted completion client, independent of any live provider.
struct ScriptedClient {
    outcomes: std::sync::Mutex<Vec<CompletionOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(mut outcomes: Vec<CompletionOutcome>) -> Self {
        outcomes.reverse();
        Self {
            outcomes: std::sync::Mutex::new(outcomes),
            calls: AtomicUsize::new(0),
        }
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
                message: "script exhausted".to_string(),
            })
    }

    fn provider_label(&self) -> String {
        "Google Gemini (scripted)".to_string()
    }
}

struct NullMail;

#[async_trait]
impl MailGateway for NullMail {
    async fn send(&self, _email: &OutboundEmail) -> Result<(), SendError> {
        Ok(())
    }

    async fn search(&self, _query: &str) -> Result<MailboxSummary, SendError> {
        Ok(MailboxSummary::default())
    }
}

struct TestApp {
    router: Router,
    ledger: Arc<TaskLedger>,
}

async fn test_app(outcomes: Vec<CompletionOutcome>, with_key: bool) -> TestApp {
    let db = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let credentials = Arc::new(CredentialStore::without_env_overrides(db.clone()));
    credentials.initialize().await.unwrap();
    if with_key {
        credentials.save_key("gemini", "test-key").await.unwrap();
    }

    let ledger = Arc::new(TaskLedger::new(db));
    ledger.initialize().await.unwrap();

    let mail: Arc<dyn MailGateway> = Arc::new(NullMail);
    let mut tools = ToolRegistry::new();
    tools.register(EmailAlertTool::new(ledger.clone(), mail.clone()));
    tools.register(CalendarTool);
    tools.register(MailSearchTool::new(mail));

    let completion: Arc<dyn CompletionClient> = Arc::new(ScriptedClient::new(outcomes));
    let orchestrator = Arc::new(AgentOrchestrator::new(
        AgentRoster::builtin(),
        credentials.clone(),
        completion.clone(),
        Arc::new(tools),
    ));

    let state = AppState {
        orchestrator,
        credentials,
        ledger: ledger.clone(),
        completion,
    };

    TestApp {
        router: build_api_router(state),
        ledger,
    }
}

async fn post_json(router: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(router: Router, uri: &str) -> Value {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn chat_returns_persona_text_on_success() {
    let app = test_app(
        vec![CompletionOutcome::Text("Hi, Kai here!".to_string())],
        true,
    )
    .await;

    let (status, body) = post_json(
        app.router,
        "/api/chat",
        json!({ "message": "hello", "agent": "kai" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["agent"], "Kai");
    assert_eq!(body["response"], "Hi, Kai here!");
    assert_eq!(body["api_working"], true);
    assert_eq!(body["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn chat_without_credential_degrades_cleanly() {
    let app = test_app(vec![], false).await;

    let (status, body) = post_json(
        app.router,
        "/api/chat",
        json!({ "message": "hello", "agent": "alex" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["api_working"], false);
    assert_eq!(body["provider"], "Demo mode (Gemini unavailable)");
    assert!(body["response"].as_str().unwrap().contains("I'm Alex"));
}

#[tokio::test]
async fn chat_defaults_unknown_agents_to_kai() {
    let app = test_app(
        vec![CompletionOutcome::Text("Hello!".to_string())],
        true,
    )
    .await;

    let (_, body) = post_json(
        app.router,
        "/api/chat",
        json!({ "message": "hi", "agent": "doesnotexist" }),
    )
    .await;
    assert_eq!(body["agent"], "Kai");
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let app = test_app(vec![], true).await;
    let (_, body) = post_json(app.router, "/api/chat", json!({ "message": "   " })).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn tool_round_trips_through_the_chat_endpoint() {
    let target = Utc::now().naive_utc() + Duration::days(2);
    let target_str = target.format("%Y-%m-%d %H:%M").to_string();

    let app = test_app(
        vec![
            CompletionOutcome::ToolCall {
                name: "schedule_email_alert".to_string(),
                args: json!({
                    "recipient": "bob@example.com",
                    "subject": "hi",
                    "body": "saying hi",
                    "scheduled_date": target_str,
                }),
            },
            CompletionOutcome::Text("Scheduled! Anything else?".to_string()),
        ],
        true,
    )
    .await;

    let ledger = app.ledger.clone();
    let (_, body) = post_json(
        app.router,
        "/api/chat",
        json!({ "message": "email Bob in two days", "agent": "alex" }),
    )
    .await;

    assert_eq!(body["api_working"], true);
    assert_eq!(body["response"], "Scheduled! Anything else?");
    // user, tool call, tool result, final text
    assert_eq!(body["history"].as_array().unwrap().len(), 4);

    let rows = ledger.due_tasks(target).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].recipient, "bob@example.com");
}

#[tokio::test]
async fn history_round_trips_between_requests() {
    let app = test_app(
        vec![CompletionOutcome::Text("first".to_string())],
        true,
    )
    .await;
    let (_, body) = post_json(
        app.router,
        "/api/chat",
        json!({ "message": "hello", "agent": "kai" }),
    )
    .await;
    let history = body["history"].clone();

    let app = test_app(
        vec![CompletionOutcome::Text("second".to_string())],
        true,
    )
    .await;
    let (_, body) = post_json(
        app.router,
        "/api/chat",
        json!({ "message": "and again", "agent": "kai", "history": history }),
    )
    .await;
    assert_eq!(body["history"].as_array().unwrap().len(), 4);
    assert_eq!(body["response"], "second");
}

#[tokio::test]
async fn key_save_and_status_endpoints() {
    let app = test_app(vec![], false).await;
    let router = app.router;

    let (_, body) = post_json(
        router.clone(),
        "/api/keys",
        json!({ "provider": "GEMINI", "api_key": "AIzaSyExampleKey" }),
    )
    .await;
    assert_eq!(body["success"], true);

    let body = get_json(router.clone(), "/api/keys").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["apis"]["gemini"]["configured"], true);
    assert_eq!(body["apis"]["gemini"]["key_preview"], "AIzaSyEx...");
    assert_eq!(body["apis"]["gmail"]["configured"], false);

    let (_, body) = post_json(
        router,
        "/api/keys",
        json!({ "provider": "smtp", "api_key": "x" }),
    )
    .await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn key_test_endpoint_probes_the_provider() {
    let app = test_app(vec![CompletionOutcome::Text("OK".to_string())], true).await;
    let router = app.router;
    let (_, body) = post_json(router.clone(), "/api/keys/test", json!({})).await;
    assert_eq!(body["success"], true);

    // The probe result is stamped on the key row and visible in the status.
    let body = get_json(router, "/api/keys").await;
    assert_eq!(body["apis"]["gemini"]["status"], "success");
    assert!(body["apis"]["gemini"]["last_tested"].is_string());

    let app = test_app(
        vec![CompletionOutcome::ProviderError {
            status: Some(400),
            message: "API key not valid".to_string(),
        }],
        true,
    )
    .await;
    let (_, body) = post_json(app.router, "/api/keys/test", json!({})).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("400"));
}

#[tokio::test]
async fn status_endpoint_lists_agents() {
    let app = test_app(vec![], false).await;
    let body = get_json(app.router, "/api/status").await;
    assert_eq!(body["success"], true);
    let agents: Vec<&str> = body["agents"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(agents.contains(&"kai"));
    assert!(agents.contains(&"alex"));
}

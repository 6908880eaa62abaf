use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::core::agents::AgentRoster;
use crate::core::credentials::CredentialStore;
use crate::core::ledger::TaskLedger;
use crate::core::llm::gemini::{DEFAULT_MODEL, GeminiClient};
use crate::core::mail::GmailGateway;
use crate::core::orchestrator::AgentOrchestrator;
use crate::core::tools::{CalendarTool, EmailAlertTool, MailSearchTool, ToolRegistry};
use crate::core::worker;
use crate::interfaces::web::{AppState, serve};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_WORKER_INTERVAL_SECS: u64 = 60;

fn print_help() {
    println!("{} persona agent chat service", style("tidecrew").green().bold());
    println!();
    println!(" {} tidecrew <command>", style("Usage:").bold());
    println!();
    println!("   serve            Start the chat API server (PORT env or --port)");
    println!("   worker run       Process the due scheduled tasks once and exit");
    println!("   worker watch     Keep processing due tasks on an interval (--interval secs)");
    println!("   init             Create the data directory and database tables");
    println!("   help             Show this help");
}

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TIDECREW_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidecrew")
}

/// Open the database and wire every component together. All shared state is
/// constructed here and injected; nothing is a process-wide singleton.
async fn bootstrap() -> Result<AppState> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating data dir {}", dir.display()))?;

    let db_path = dir.join("tidecrew.db");
    let db = Arc::new(Mutex::new(
        Connection::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?,
    ));
    info!("Using database at {}", db_path.display());

    let credentials = Arc::new(CredentialStore::new(db.clone()));
    credentials.initialize().await?;

    let ledger = Arc::new(TaskLedger::new(db));
    ledger.initialize().await?;

    let mail = Arc::new(GmailGateway::new(credentials.clone()));

    let mut tools = ToolRegistry::new();
    tools.register(EmailAlertTool::new(ledger.clone(), mail.clone()));
    tools.register(CalendarTool);
    tools.register(MailSearchTool::new(mail));
    let tools = Arc::new(tools);

    let completion: Arc<dyn crate::core::llm::CompletionClient> =
        Arc::new(GeminiClient::new(DEFAULT_MODEL));

    let orchestrator = Arc::new(AgentOrchestrator::new(
        AgentRoster::builtin(),
        credentials.clone(),
        completion.clone(),
        tools,
    ));

    Ok(AppState {
        orchestrator,
        credentials,
        ledger,
        completion,
    })
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("serve") => {
            init_logging();
            let state = bootstrap().await?;
            let port = flag_value(&args, "--port")
                .or_else(|| std::env::var("PORT").ok())
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT);
            serve(state, "0.0.0.0", port).await
        }
        Some("worker") => {
            init_logging();
            let state = bootstrap().await?;
            let mail = GmailGateway::new(state.credentials.clone());

            match args.get(1).map(String::as_str) {
                Some("watch") => {
                    let secs = flag_value(&args, "--interval")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(DEFAULT_WORKER_INTERVAL_SECS);
                    info!("Worker watching with a {}s interval", secs);
                    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
                    loop {
                        ticker.tick().await;
                        if let Err(e) = worker::run_due_tasks(&state.ledger, &mail).await {
                            tracing::error!("Worker pass failed: {}", e);
                        }
                    }
                }
                // Single pass for cron-style invocation.
                _ => {
                    let report = worker::run_due_tasks(&state.ledger, &mail).await?;
                    println!(
                        "{} sent, {} failed, {} retained",
                        report.sent, report.failed, report.retained
                    );
                    Ok(())
                }
            }
        }
        Some("init") => {
            init_logging();
            bootstrap().await?;
            println!("Initialized data directory at {}", data_dir().display());
            Ok(())
        }
        _ => {
            print_help();
            Ok(())
        }
    }
}

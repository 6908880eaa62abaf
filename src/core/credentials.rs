use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A named capability the pipeline needs a secret for. Each maps to one
/// provider row and one environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Llm,
    Mailer,
}

impl Capability {
    pub fn provider(&self) -> &'static str {
        match self {
            Capability::Llm => "gemini",
            Capability::Mailer => "gmail",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            Capability::Llm => "GEMINI_API_KEY",
            Capability::Mailer => "GMAIL_ACCESS_TOKEN",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct KeyStatus {
    pub configured: bool,
    pub key_preview: String,
    pub status: String,
    pub last_tested: Option<String>,
}

/// Key/secret storage with environment-first resolution. The environment
/// value always wins over the persisted row so a redeployment with fresh env
/// configuration is never shadowed by a stale database entry.
pub struct CredentialStore {
    db: Arc<Mutex<Connection>>,
    env_overrides: bool,
}

impl CredentialStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self {
            db,
            env_overrides: true,
        }
    }

    /// Skip environment lookup. Used by hermetic test setups where ambient
    /// variables must not leak into resolution.
    pub fn without_env_overrides(db: Arc<Mutex<Connection>>) -> Self {
        Self {
            db,
            env_overrides: false,
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS api_keys (
                provider TEXT PRIMARY KEY,
                api_key TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_tested TEXT,
                test_status TEXT NOT NULL DEFAULT 'untested',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }

    /// Resolve a capability to a usable secret. `Ok(None)` means not
    /// configured anywhere, which is a normal outcome the caller must handle
    /// with a degraded reply, not a failure.
    pub async fn resolve(&self, capability: Capability) -> Result<Option<String>> {
        if self.env_overrides
            && let Ok(value) = std::env::var(capability.env_var())
            && !value.is_empty()
        {
            return Ok(Some(value));
        }

        let db = self.db.lock().await;
        let value = db
            .query_row(
                "SELECT api_key FROM api_keys WHERE provider = ?1 AND is_active = 1",
                params![capability.provider()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Administrative upsert, reached through the settings endpoint.
    pub async fn save_key(&self, provider: &str, api_key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO api_keys (provider, api_key, is_active) VALUES (?1, ?2, 1)
             ON CONFLICT(provider) DO UPDATE SET api_key = excluded.api_key,
                 is_active = excluded.is_active",
            params![provider, api_key],
        )?;
        info!("API key saved for provider {}", provider);
        Ok(())
    }

    pub async fn record_test(&self, provider: &str, status: &str) -> Result<()> {
        let now = Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string();
        let db = self.db.lock().await;
        db.execute(
            "UPDATE api_keys SET test_status = ?1, last_tested = ?2 WHERE provider = ?3",
            params![status, now, provider],
        )?;
        Ok(())
    }

    pub async fn status(&self, capability: Capability) -> Result<KeyStatus> {
        let row = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT api_key, test_status, last_tested FROM api_keys WHERE provider = ?1",
                params![capability.provider()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?
        };

        let env_key = if self.env_overrides {
            std::env::var(capability.env_var()).ok().filter(|v| !v.is_empty())
        } else {
            None
        };

        let (db_key, status, last_tested) = match row {
            Some((key, status, tested)) => (Some(key), status, tested),
            None => (None, "missing".to_string(), None),
        };

        let shown = env_key.as_deref().or(db_key.as_deref());
        Ok(KeyStatus {
            configured: shown.is_some(),
            key_preview: mask_key(shown),
            status,
            last_tested,
        })
    }
}

fn mask_key(key: Option<&str>) -> String {
    match key {
        // Count characters, not bytes: slicing a multibyte key mid-char panics.
        Some(k) if k.chars().count() > 8 => {
            format!("{}...", k.chars().take(8).collect::<String>())
        }
        Some(k) => k.to_string(),
        None => "N/A".to_string(),
    }
}

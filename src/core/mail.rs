use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::credentials::{Capability, CredentialStore};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const SEARCH_MAX_RESULTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Typed send failure. The worker's retriable/terminal decision is a match
/// on these variants, so classification happens here, at the wire, and
/// nowhere else. Auth failures are retriable: a refreshed token can land
/// before the next cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    Auth(String),
    InvalidRecipient(String),
    Transient(String),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Auth(m) => write!(f, "mail authentication failed: {m}"),
            SendError::InvalidRecipient(m) => write!(f, "invalid recipient: {m}"),
            SendError::Transient(m) => write!(f, "transient mail failure: {m}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MailboxSummary {
    pub matches: usize,
    pub latest_subject: Option<String>,
}

/// The side-effecting mail seam shared by the synchronous tool path and the
/// deferred worker path.
#[async_trait]
pub trait MailGateway: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError>;
    async fn search(&self, query: &str) -> Result<MailboxSummary, SendError>;
}

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct MessageMetadata {
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<MessageHeader>,
}

#[derive(Deserialize)]
struct MessageHeader {
    name: String,
    value: String,
}

/// Gmail REST gateway. The bearer token comes from the credential store
/// (produced by an external OAuth flow); this layer only consumes it.
pub struct GmailGateway {
    http: Client,
    credentials: Arc<CredentialStore>,
}

impl GmailGateway {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, credentials }
    }

    async fn token(&self) -> Result<String, SendError> {
        match self.credentials.resolve(Capability::Mailer).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(SendError::Auth(
                "Gmail access token is not configured".to_string(),
            )),
            Err(e) => Err(SendError::Transient(format!("credential store: {e}"))),
        }
    }
}

/// RFC 822 text message, base64url-encoded the way the Gmail API wants it.
fn encode_raw_message(email: &OutboundEmail) -> String {
    let mime = format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"utf-8\"\r\n\r\n{}",
        email.recipient, email.subject, email.body
    );
    URL_SAFE_NO_PAD.encode(mime.as_bytes())
}

fn classify_status(status: u16, body: &str) -> SendError {
    let detail = format!("HTTP {status}: {body}");
    match status {
        401 | 403 => SendError::Auth(detail),
        400 => SendError::InvalidRecipient(detail),
        _ => SendError::Transient(detail),
    }
}

#[async_trait]
impl MailGateway for GmailGateway {
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
        let token = self.token().await?;
        let response = self
            .http
            .post(format!("{GMAIL_API_BASE}/messages/send"))
            .bearer_auth(&token)
            .json(&json!({ "raw": encode_raw_message(email) }))
            .send()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!("Email sent to {} (subject: {})", email.recipient, email.subject);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status.as_u16(), &body);
            error!("Gmail send to {} failed: {}", email.recipient, err);
            Err(err)
        }
    }

    async fn search(&self, query: &str) -> Result<MailboxSummary, SendError> {
        let token = self.token().await?;
        let response = self
            .http
            .get(format!("{GMAIL_API_BASE}/messages"))
            .bearer_auth(&token)
            .query(&[
                ("q", query),
                ("maxResults", &SEARCH_MAX_RESULTS.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let list: MessageList = response
            .json()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        let mut summary = MailboxSummary {
            matches: list.messages.len(),
            latest_subject: None,
        };

        if let Some(first) = list.messages.first() {
            let meta = self
                .http
                .get(format!("{GMAIL_API_BASE}/messages/{}", first.id))
                .bearer_auth(&token)
                .query(&[("format", "metadata"), ("metadataHeaders", "Subject")])
                .send()
                .await
                .map_err(|e| SendError::Transient(e.to_string()))?;

            if meta.status().is_success()
                && let Ok(meta) = meta.json::<MessageMetadata>().await
            {
                summary.latest_subject = meta
                    .payload
                    .into_iter()
                    .flat_map(|p| p.headers)
                    .find(|h| h.name.eq_ignore_ascii_case("Subject"))
                    .map(|h| h.value);
            }
        }

        Ok(summary)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_is_base64url_of_rfc822() {
        let email = OutboundEmail {
            recipient: "bob@example.com".to_string(),
            subject: "Hi".to_string(),
            body: "hello".to_string(),
        };
        let decoded = URL_SAFE_NO_PAD.decode(encode_raw_message(&email)).unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.starts_with("To: bob@example.com\r\n"));
        assert!(text.contains("Subject: Hi\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn status_classification_matches_worker_policy() {
        assert!(matches!(classify_status(401, ""), SendError::Auth(_)));
        assert!(matches!(classify_status(403, ""), SendError::Auth(_)));
        assert!(matches!(
            classify_status(400, "invalid To header"),
            SendError::InvalidRecipient(_)
        ));
        assert!(matches!(classify_status(429, ""), SendError::Transient(_)));
        assert!(matches!(classify_status(503, ""), SendError::Transient(_)));
    }
}

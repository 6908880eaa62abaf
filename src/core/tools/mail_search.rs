use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolError};
use crate::core::mail::MailGateway;

/// Inbox search tool backed by the mail gateway's query endpoint.
pub struct MailSearchTool {
    mail: Arc<dyn MailGateway>,
}

impl MailSearchTool {
    pub fn new(mail: Arc<dyn MailGateway>) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl Tool for MailSearchTool {
    fn name(&self) -> &str {
        "check_priority_mail"
    }

    fn description(&self) -> &str {
        "Check recent inbox emails matching a search query. Use relevant keywords, \
         e.g. 'is:unread subject:urgent'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Mail search query, e.g. 'is:unread subject:urgent'"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing argument 'query'".to_string()))?;

        let summary = self
            .mail
            .search(query)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        if summary.matches == 0 {
            return Ok(format!("No emails found for the query '{query}'."));
        }

        let mut out = format!(
            "Found {} email(s) matching the query '{query}'.",
            summary.matches
        );
        if let Some(subject) = summary.latest_subject {
            out.push_str(&format!(" The most recent subject is: '{subject}'."));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mail::testing::MockMailGateway;
    use crate::core::mail::{MailboxSummary, SendError};

    #[tokio::test]
    async fn reports_match_count_and_latest_subject() {
        let mail = MockMailGateway::working();
        *mail.search_result.lock().await = Ok(MailboxSummary {
            matches: 3,
            latest_subject: Some("Invoice overdue".to_string()),
        });
        let tool = MailSearchTool::new(Arc::new(mail));

        let out = tool
            .execute(&json!({ "query": "is:unread" }))
            .await
            .unwrap();
        assert!(out.contains("Found 3 email(s)"));
        assert!(out.contains("Invoice overdue"));
    }

    #[tokio::test]
    async fn empty_result_reads_as_no_emails() {
        let tool = MailSearchTool::new(Arc::new(MockMailGateway::working()));
        let out = tool
            .execute(&json!({ "query": "subject:ghost" }))
            .await
            .unwrap();
        assert!(out.contains("No emails found"));
    }

    #[tokio::test]
    async fn gateway_failure_becomes_execution_error() {
        let mail = MockMailGateway::working();
        *mail.search_result.lock().await =
            Err(SendError::Auth("token expired".to_string()));
        let tool = MailSearchTool::new(Arc::new(mail));

        let err = tool
            .execute(&json!({ "query": "is:unread" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use serde_json::{Value, json};
use tracing::warn;

use super::{Tool, ToolError};
use crate::core::ledger::TaskLedger;
use crate::core::mail::{MailGateway, OutboundEmail};

/// Argument format for the scheduled send time.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Targets inside this window (inclusive) are sent synchronously; anything
/// further out becomes a pending ledger row for the worker. Design parameter,
/// not a magic constant: widening it trades ledger churn for request latency.
pub const DEFAULT_GRACE_MINUTES: i64 = 5;

pub const TASK_TYPE_EMAIL: &str = "email_alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    Immediate,
    Deferred,
}

/// Pure path decision so the boundary is testable without a clock.
/// Inclusive: a target exactly at `now + grace` still sends synchronously.
pub fn send_path(scheduled: NaiveDateTime, now: NaiveDateTime, grace: Duration) -> SendPath {
    if scheduled <= now + grace {
        SendPath::Immediate
    } else {
        SendPath::Deferred
    }
}

/// Send-or-schedule email tool. "Now" and "later" share this one entry point
/// and diverge on the grace-window threshold.
pub struct EmailAlertTool {
    ledger: Arc<TaskLedger>,
    mail: Arc<dyn MailGateway>,
    grace: Duration,
}

impl EmailAlertTool {
    pub fn new(ledger: Arc<TaskLedger>, mail: Arc<dyn MailGateway>) -> Self {
        Self {
            ledger,
            mail,
            grace: Duration::minutes(DEFAULT_GRACE_MINUTES),
        }
    }

    async fn defer(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        scheduled: NaiveDateTime,
        note: &str,
    ) -> Result<String, ToolError> {
        match self
            .ledger
            .insert_pending(TASK_TYPE_EMAIL, recipient, subject, body, scheduled)
            .await
        {
            Ok(_) => Ok(format!(
                "{note}The email to {recipient} (subject: {subject}) is scheduled for {} and \
                 will go out on the next worker cycle.",
                scheduled.format(DATE_FORMAT)
            )),
            // A failed insert must never read as success: the caller has to
            // know the email is not scheduled anywhere.
            Err(e) => Err(ToolError::Execution(format!(
                "could not persist the scheduled email; it is NOT scheduled: {e}"
            ))),
        }
    }
}

#[async_trait]
impl Tool for EmailAlertTool {
    fn name(&self) -> &str {
        "schedule_email_alert"
    }

    fn description(&self) -> &str {
        "Send an email now, or schedule it for a future date. Emails targeted within the \
         next few minutes are sent immediately; later targets are queued and sent at the \
         scheduled time."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recipient": {
                    "type": "string",
                    "description": "Recipient email address, e.g. 'client@example.com'"
                },
                "subject": { "type": "string", "description": "Email subject line" },
                "body": { "type": "string", "description": "Plain-text email body" },
                "scheduled_date": {
                    "type": "string",
                    "description": "Send time in YYYY-MM-DD HH:MM format (UTC)"
                }
            },
            "required": ["recipient", "subject", "body", "scheduled_date"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<String, ToolError> {
        let recipient = str_arg(args, "recipient")?;
        let subject = str_arg(args, "subject")?;
        let body = str_arg(args, "body")?;
        let date_str = str_arg(args, "scheduled_date")?;

        let scheduled = NaiveDateTime::parse_from_str(date_str, DATE_FORMAT).map_err(|_| {
            ToolError::InvalidArgs(format!(
                "scheduled_date '{date_str}' must use the YYYY-MM-DD HH:MM format"
            ))
        })?;

        let now = Utc::now().naive_utc();
        match send_path(scheduled, now, self.grace) {
            SendPath::Immediate => {
                let email = OutboundEmail {
                    recipient: recipient.to_string(),
                    subject: subject.to_string(),
                    body: body.to_string(),
                };
                match self.mail.send(&email).await {
                    Ok(()) => Ok(format!(
                        "Email sent immediately to {recipient} (subject: {subject})."
                    )),
                    Err(e) => {
                        // Fall back to the ledger so a transient outage does
                        // not drop the message; the worker retries it.
                        warn!("Immediate send to {} failed, queuing instead: {}", recipient, e);
                        self.defer(
                            recipient,
                            subject,
                            body,
                            now,
                            &format!("Immediate send failed ({e}). "),
                        )
                        .await
                    }
                }
            }
            SendPath::Deferred => self.defer(recipient, subject, body, scheduled, "").await,
        }
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing argument '{key}'")))
}

use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use tracing::{info, warn};

use super::ledger::{ScheduledTask, TaskLedger};
use super::mail::{MailGateway, OutboundEmail, SendError};

/// Outcome of one worker pass over the due backlog.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub sent: usize,
    pub failed: usize,
    /// Rows left pending after a retriable failure; the next cycle picks
    /// them up again.
    pub retained: usize,
}

/// One pass over the ledger: send everything due, transition statuses, exit.
/// The external scheduler (cron or `worker watch`) decides the cadence; at
/// most one worker instance runs at a time (deployment assumption).
pub async fn run_due_tasks(ledger: &TaskLedger, mail: &dyn MailGateway) -> Result<WorkerReport> {
    process_due(ledger, mail, Utc::now().naive_utc()).await
}

pub async fn process_due(
    ledger: &TaskLedger,
    mail: &dyn MailGateway,
    now: NaiveDateTime,
) -> Result<WorkerReport> {
    let due = ledger.due_tasks(now).await?;
    if due.is_empty() {
        info!("No pending tasks due");
        return Ok(WorkerReport::default());
    }

    info!("Processing {} due task(s)", due.len());
    let mut report = WorkerReport::default();

    for task in due {
        match mail.send(&email_of(&task)).await {
            Ok(()) => {
                // Conditional claim: a row another pass already transitioned
                // is not counted as ours.
                if ledger.mark_sent(task.id, now).await? {
                    info!("Task {} sent to {}", task.id, task.recipient);
                    report.sent += 1;
                } else {
                    warn!("Task {} was already handled elsewhere", task.id);
                }
            }
            // Permanently bad recipient: retrying would fail forever.
            Err(e @ SendError::InvalidRecipient(_)) => {
                warn!("Task {} failed terminally: {}", task.id, e);
                ledger.mark_failed(task.id).await?;
                report.failed += 1;
            }
            // Auth and transient failures are retriable; leave the row
            // pending for the next cycle.
            Err(e) => {
                warn!("Task {} left pending for retry: {}", task.id, e);
                report.retained += 1;
            }
        }
    }

    info!(
        "Worker pass done: {} sent, {} failed, {} retained",
        report.sent, report.failed, report.retained
    );
    Ok(report)
}

fn email_of(task: &ScheduledTask) -> OutboundEmail {
    OutboundEmail {
        recipient: task.recipient.clone(),
        subject: task.subject.clone(),
        body: task.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::TaskStatus;
    use crate::core::mail::testing::MockMailGateway;
    use chrono::Duration;
    use rusqlite::Connection;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    async fn test_ledger() -> TaskLedger {
        let db = Connection::open_in_memory().unwrap();
        let ledger = TaskLedger::new(Arc::new(Mutex::new(db)));
        ledger.initialize().await.unwrap();
        ledger
    }

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    #[tokio::test]
    async fn due_pending_task_transitions_to_sent() {
        let ledger = test_ledger().await;
        let t = now();
        let id = ledger
            .insert_pending("email_alert", "bob@x.com", "s", "b", t - Duration::hours(1))
            .await
            .unwrap();

        let mail = MockMailGateway::working();
        let report = process_due(&ledger, &mail, t).await.unwrap();

        assert_eq!(report, WorkerReport { sent: 1, failed: 0, retained: 0 });
        assert_eq!(mail.sent_count().await, 1);
        assert_eq!(ledger.status_of(id).await.unwrap(), Some(TaskStatus::Sent));
    }

    #[tokio::test]
    async fn future_task_is_not_picked_up() {
        let ledger = test_ledger().await;
        let t = now();
        ledger
            .insert_pending("email_alert", "bob@x.com", "s", "b", t + Duration::days(1))
            .await
            .unwrap();

        let mail = MockMailGateway::working();
        let report = process_due(&ledger, &mail, t).await.unwrap();
        assert_eq!(report, WorkerReport::default());
        assert_eq!(mail.sent_count().await, 0);
    }

    #[tokio::test]
    async fn rerun_does_not_resend_an_already_sent_task() {
        let ledger = test_ledger().await;
        let t = now();
        ledger
            .insert_pending("email_alert", "bob@x.com", "s", "b", t)
            .await
            .unwrap();

        let mail = MockMailGateway::working();
        process_due(&ledger, &mail, t).await.unwrap();
        let second = process_due(&ledger, &mail, t).await.unwrap();

        assert_eq!(second, WorkerReport::default());
        assert_eq!(mail.sent_count().await, 1);
    }

    #[tokio::test]
    async fn transient_failure_leaves_the_row_pending() {
        let ledger = test_ledger().await;
        let t = now();
        let id = ledger
            .insert_pending("email_alert", "bob@x.com", "s", "b", t)
            .await
            .unwrap();

        let mail = MockMailGateway::failing(SendError::Transient("503".to_string()));
        let report = process_due(&ledger, &mail, t).await.unwrap();

        assert_eq!(report, WorkerReport { sent: 0, failed: 0, retained: 1 });
        assert_eq!(
            ledger.status_of(id).await.unwrap(),
            Some(TaskStatus::Pending)
        );

        // Next cycle retries and succeeds.
        let mail = MockMailGateway::working();
        let retry = process_due(&ledger, &mail, t).await.unwrap();
        assert_eq!(retry.sent, 1);
        assert_eq!(ledger.status_of(id).await.unwrap(), Some(TaskStatus::Sent));
    }

    #[tokio::test]
    async fn auth_failure_is_retriable() {
        let ledger = test_ledger().await;
        let t = now();
        let id = ledger
            .insert_pending("email_alert", "bob@x.com", "s", "b", t)
            .await
            .unwrap();

        let mail = MockMailGateway::failing(SendError::Auth("token expired".to_string()));
        let report = process_due(&ledger, &mail, t).await.unwrap();

        assert_eq!(report.retained, 1);
        assert_eq!(
            ledger.status_of(id).await.unwrap(),
            Some(TaskStatus::Pending)
        );
    }

    #[tokio::test]
    async fn invalid_recipient_is_terminal() {
        let ledger = test_ledger().await;
        let t = now();
        let id = ledger
            .insert_pending(
                "email_alert",
                "unreachable@bounces.example.com",
                "s",
                "b",
                t - Duration::minutes(10),
            )
            .await
            .unwrap();

        let mail = MockMailGateway::failing(SendError::InvalidRecipient(
            "550 no such user".to_string(),
        ));
        let report = process_due(&ledger, &mail, t).await.unwrap();

        assert_eq!(report, WorkerReport { sent: 0, failed: 1, retained: 0 });
        assert_eq!(
            ledger.status_of(id).await.unwrap(),
            Some(TaskStatus::Failed)
        );

        // And it stays failed: the next pass must not see it again.
        let second = process_due(&ledger, &mail, t).await.unwrap();
        assert_eq!(second, WorkerReport::default());
    }
}

use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage format for timestamps. ISO-8601 without zone so SQL string
/// comparison and chronological order agree.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Sent,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Sent => "sent",
            TaskStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> TaskStatus {
        match s {
            "sent" => TaskStatus::Sent,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: i64,
    pub task_type: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub scheduled_at: NaiveDateTime,
    pub status: TaskStatus,
}

/// Durable table of deferred actions, shared between the web process (tool
/// path writes) and the worker (status transitions). All status changes go
/// through conditional updates so two readers cannot both claim a row.
pub struct TaskLedger {
    db: Arc<Mutex<Connection>>,
}

impl TaskLedger {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                sent_at TEXT
            )",
            [],
        )?;
        Ok(())
    }

    pub async fn insert_pending(
        &self,
        task_type: &str,
        recipient: &str,
        subject: &str,
        body: &str,
        scheduled_at: NaiveDateTime,
    ) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO scheduled_tasks (task_type, recipient, subject, body, scheduled_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task_type,
                recipient,
                subject,
                body,
                scheduled_at.format(TIME_FORMAT).to_string()
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Pending rows whose scheduled time is at or before `now`. Rows already
    /// sent or failed never reappear here.
    pub async fn due_tasks(&self, now: NaiveDateTime) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, task_type, recipient, subject, body, scheduled_time, status
             FROM scheduled_tasks
             WHERE status = 'pending' AND scheduled_time <= ?1
             ORDER BY scheduled_time ASC",
        )?;

        let rows = stmt.query_map(params![now.format(TIME_FORMAT).to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut tasks = Vec::new();
        for row in rows {
            let (id, task_type, recipient, subject, body, scheduled, status) = row?;
            tasks.push(ScheduledTask {
                id,
                task_type,
                recipient,
                subject,
                body,
                scheduled_at: NaiveDateTime::parse_from_str(&scheduled, TIME_FORMAT)?,
                status: TaskStatus::parse(&status),
            });
        }
        Ok(tasks)
    }

    /// Claim a pending row as sent. Returns false when the row was already
    /// transitioned by someone else; the caller must not treat the task as
    /// its own in that case.
    pub async fn mark_sent(&self, id: i64, sent_at: NaiveDateTime) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE scheduled_tasks SET status = 'sent', sent_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![sent_at.format(TIME_FORMAT).to_string(), id],
        )?;
        Ok(changed > 0)
    }

    /// Terminal transition for non-retriable failures.
    pub async fn mark_failed(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE scheduled_tasks SET status = 'failed'
             WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(changed > 0)
    }

    pub async fn status_of(&self, id: i64) -> Result<Option<TaskStatus>> {
        let db = self.db.lock().await;
        let status = db
            .query_row(
                "SELECT status FROM scheduled_tasks WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(status.map(|s| TaskStatus::parse(&s)))
    }
}

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde_json::{Value, json};

use super::email_alert::DATE_FORMAT;
use super::{Tool, ToolError};

/// Calendar event tool. Parses and confirms the booking details; the actual
/// Google Calendar API call is not wired up yet, so the confirmation is
/// generated locally.
pub struct CalendarTool;

#[async_trait]
impl Tool for CalendarTool {
    fn name(&self) -> &str {
        "add_calendar_event"
    }

    fn description(&self) -> &str {
        "Add an event to the calendar. Useful for planning meetings, reminders or tasks."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Event title, e.g. 'Client meeting'" },
                "start": {
                    "type": "string",
                    "description": "Start date and time in YYYY-MM-DD HH:MM format"
                },
                "duration_hours": { "type": "number", "description": "Duration in hours, e.g. 1.5" },
                "notes": { "type": "string", "description": "Event description or notes" }
            },
            "required": ["title", "start", "duration_hours"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<String, ToolError> {
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing argument 'title'".to_string()))?;
        let start_str = args
            .get("start")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing argument 'start'".to_string()))?;
        let duration_hours = args
            .get("duration_hours")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                ToolError::InvalidArgs("missing argument 'duration_hours'".to_string())
            })?;
        let notes = args.get("notes").and_then(Value::as_str).unwrap_or("");

        let start = NaiveDateTime::parse_from_str(start_str, DATE_FORMAT).map_err(|_| {
            ToolError::InvalidArgs(format!(
                "start '{start_str}' must use the YYYY-MM-DD HH:MM format"
            ))
        })?;
        let end = start + Duration::minutes((duration_hours * 60.0).round() as i64);

        Ok(format!(
            "Calendar event planned: '{title}' from {} to {} ({duration_hours}h). Notes: {notes}",
            start.format(DATE_FORMAT),
            end.format(DATE_FORMAT)
        ))
    }
}

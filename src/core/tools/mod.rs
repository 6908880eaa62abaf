pub mod calendar;
pub mod email_alert;
pub mod mail_search;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::llm::ToolSpec;

pub use calendar::CalendarTool;
pub use email_alert::EmailAlertTool;
pub use mail_search::MailSearchTool;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// The model asked for a name nobody registered. Terminal for the round.
    Unknown(String),
    /// Arguments failed schema validation before the tool ever ran.
    InvalidArgs(String),
    /// The tool ran and failed.
    Execution(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Unknown(name) => write!(f, "unknown tool: {name}"),
            ToolError::InvalidArgs(m) => write!(f, "invalid tool arguments: {m}"),
            ToolError::Execution(m) => write!(f, "tool execution failed: {m}"),
        }
    }
}

/// A named, schema-declared action the model may request. Implementations
/// may perform I/O; they report failure through `ToolError`, never a panic.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Shown to the model so it knows when to call this tool.
    fn description(&self) -> &str;

    /// JSON schema of the arguments (`properties` + `required`).
    fn parameters(&self) -> Value;

    async fn execute(&self, args: &Value) -> Result<String, ToolError>;
}

/// Fixed name-to-implementation mapping, built once at startup and injected
/// wherever tool dispatch is needed.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        info!("Registered tool: {}", name);
        self.tools.insert(name, Arc::new(tool));
    }

    /// Declarations for the subset of tools an agent is allowed to call,
    /// in the shape the completion request wants.
    pub fn specs_for(&self, allowed: &[String]) -> Vec<ToolSpec> {
        allowed
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Resolve, validate, and run one tool call. Validation happens against
    /// the declared schema before the implementation sees the arguments.
    pub async fn invoke(&self, name: &str, args: &Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        validate_args(&tool.parameters(), args)?;
        tool.execute(args).await
    }
}

/// Check required keys and primitive types against the declared schema.
/// A typed validation error beats letting a tool crash on a missing field.
fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let Some(args_map) = args.as_object() else {
        return Err(ToolError::InvalidArgs(
            "arguments must be a JSON object".to_string(),
        ));
    };

    let properties = schema.get("properties").and_then(Value::as_object);
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            let value = args_map
                .get(key)
                .ok_or_else(|| ToolError::InvalidArgs(format!("missing argument '{key}'")))?;

            let declared = properties
                .and_then(|p| p.get(key))
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            let ok = match declared {
                Some("string") => value.is_string(),
                Some("number") => value.is_number(),
                Some("boolean") => value.is_boolean(),
                _ => true,
            };
            if !ok {
                return Err(ToolError::InvalidArgs(format!(
                    "argument '{key}' has the wrong type (expected {})",
                    declared.unwrap_or("any")
                )));
            }
        }
    }
    Ok(())
}

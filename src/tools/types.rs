//! Core tool types.
//!
//! Defines the [`Tool`] trait that all tools implement, the explicit
//! [`ToolIntent`] classification, and [`ToolCallResult`], the record every
//! attempted call produces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Maximum characters of tool output kept in a summary line.
pub const SUMMARY_MAX_CHARS: usize = 500;

/// What a tool does to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolIntent {
    /// Reads information; results may be deferred to the next turn.
    Query,
    /// Changes the physical or digital environment.
    Action,
}

/// Successful tool output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Human-readable outcome.
    pub message: Option<String>,
    /// Structured payload.
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn data(data: serde_json::Value) -> Self {
        Self {
            message: None,
            data: Some(data),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A parameterized call the model chose to make itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectToolCall {
    pub tool_name: String,
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
}

fn empty_parameters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Errors a tool can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// A backing service (store, Home Assistant) is unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// The outcome of one attempted tool call.
///
/// Produced for every call, including unknown tools, timeouts and panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Registry name of the tool that was called.
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    /// A successful call.
    pub fn success(tool: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            tool: tool.into(),
            success: true,
            message: output.message,
            data: output.data,
            error: None,
        }
    }

    /// A failed call.
    pub fn failure(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }

    /// The most useful single-line description: message, then data, then error.
    pub fn detail(&self) -> String {
        let raw = if let Some(message) = self.message.as_deref().filter(|m| !m.trim().is_empty()) {
            message.to_owned()
        } else if let Some(data) = &self.data {
            data.to_string()
        } else if let Some(error) = &self.error {
            format!("error: {error}")
        } else if self.success {
            "done".to_owned()
        } else {
            "failed".to_owned()
        };
        truncate_chars(&raw.replace('\n', " "), SUMMARY_MAX_CHARS)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

/// Core trait for tools the model can use.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name, e.g. `"search_memories"` or `"light.turn_on"`.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn schema(&self) -> serde_json::Value;

    /// Fixed classification, set at registration.
    fn intent(&self) -> ToolIntent;

    /// Execute the tool with JSON arguments.
    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_record_carries_error() {
        let result = ToolCallResult::failure("bogus_tool", "unknown tool");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown tool"));
        assert_eq!(result.detail(), "error: unknown tool");
    }

    #[test]
    fn detail_prefers_message_over_data() {
        let result = ToolCallResult::success(
            "hass.get_state",
            ToolOutput::message("light is on").with_data(serde_json::json!({"state": "on"})),
        );
        assert_eq!(result.detail(), "light is on");

        let result = ToolCallResult::success("x", ToolOutput::data(serde_json::json!({"a": 1})));
        assert_eq!(result.detail(), r#"{"a":1}"#);
    }

    #[test]
    fn detail_is_single_line_and_bounded() {
        let long = "line\n".repeat(400);
        let result = ToolCallResult::success("x", ToolOutput::message(long));
        let detail = result.detail();
        assert!(!detail.contains('\n'));
        assert_eq!(detail.chars().count(), SUMMARY_MAX_CHARS + 1);
    }

    #[test]
    fn result_serializes_without_empty_fields() {
        let json = serde_json::to_value(ToolCallResult::failure("x", "boom")).unwrap_or_default();
        assert_eq!(json["success"], false);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn intent_wire_names() {
        assert_eq!(
            serde_json::to_string(&ToolIntent::Query).unwrap_or_default(),
            "\"query\""
        );
    }
}

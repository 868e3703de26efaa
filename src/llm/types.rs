//! Request and response types for structured-output completions.

use serde::{Deserialize, Serialize};

use super::message::Message;

/// A completion whose answer must be a JSON object matching `schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation.
    pub messages: Vec<Message>,
    /// Schema name reported to the provider.
    pub schema_name: String,
    /// JSON Schema for the answer object.
    pub schema: serde_json::Value,
    pub temperature: Option<f64>,
    pub max_tokens: Option<usize>,
}

impl StructuredRequest {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<Message>,
        schema_name: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            schema_name: schema_name.into(),
            schema,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A parsed structured completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    /// Raw assistant text.
    pub content: String,
    /// Parsed JSON object. Never empty.
    pub output: serde_json::Value,
    /// Model that actually answered, if reported.
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Parse assistant text into a non-empty JSON object.
///
/// Tolerates a surrounding markdown code fence, which some models emit even
/// in JSON mode.
pub fn parse_structured_content(content: &str) -> super::error::Result<serde_json::Value> {
    use super::error::LlmError;

    let trimmed = strip_code_fence(content.trim());
    if trimmed.is_empty() {
        return Err(LlmError::EmptyResponse("model returned empty content".into()));
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| LlmError::InvalidOutput(format!("content is not JSON: {e}")))?;
    match &value {
        serde_json::Value::Object(map) if map.is_empty() => Err(LlmError::EmptyResponse(
            "model returned an empty structured object".into(),
        )),
        serde_json::Value::Object(_) => Ok(value),
        other => Err(LlmError::InvalidOutput(format!(
            "expected a JSON object, got {}",
            json_type_name(other)
        ))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

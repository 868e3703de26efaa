//! OpenAI-compatible Chat Completions adapter with JSON-schema output.
//!
//! Works against OpenAI, OpenRouter, and local servers that implement
//! `response_format: { type: "json_schema" }`.

use std::time::Duration;

use async_trait::async_trait;

use super::error::LlmError;
use super::message::Message;
use super::provider::StructuredLlm;
use super::types::{StructuredRequest, StructuredResponse, TokenUsage, parse_structured_content};
use crate::config::LlmConfig;

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL without the `/v1` suffix.
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Create a config with the given API key and the public OpenAI endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from the `[llm]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] when no API key is configured or
    /// present in the environment.
    pub fn from_llm_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.effective_api_key().ok_or_else(|| {
            LlmError::ConfigError(
                "no API key: set llm.api_key, OPENROUTER_API_KEY or OPENAI_API_KEY".into(),
            )
        })?;
        Ok(Self::new(api_key)
            .with_base_url(config.base_url.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs)))
    }
}

// ── Request Builder ───────────────────────────────────────────

/// Build the JSON request body for a structured Chat Completions call.
pub fn build_structured_request(request: &StructuredRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": request.model,
        "messages": messages_to_openai(&request.messages),
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": request.schema_name,
                // Tool parameters are free-form objects, which strict mode rejects.
                "strict": false,
                "schema": request.schema,
            }
        },
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(temperature) = request.temperature {
            obj.insert("temperature".into(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            obj.insert("max_tokens".into(), serde_json::json!(max_tokens));
        }
    }

    body
}

fn messages_to_openai(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.to_string(), "content": m.content }))
        .collect()
}

/// Parse a non-streaming Chat Completions response body.
pub fn parse_completion_response(body: &serde_json::Value) -> Result<StructuredResponse, LlmError> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_owned();

    let output = parse_structured_content(&content)?;

    let usage = body.get("usage").map(|u| TokenUsage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    });

    Ok(StructuredResponse {
        content,
        output,
        model: body.get("model").and_then(|m| m.as_str()).map(String::from),
        usage,
    })
}

// ── Adapter Implementation ────────────────────────────────────

/// OpenAI-compatible structured completion adapter.
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl OpenAiAdapter {
    /// Create a new adapter.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if the HTTP client cannot be built.
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url)
    }

    /// Map an HTTP error status to the appropriate LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        let message = extract_error_message(body);
        match status.as_u16() {
            401 | 403 => LlmError::AuthError(format!("authentication failed: {message}")),
            408 => LlmError::TimeoutError(format!("provider timed out: {message}")),
            429 => LlmError::RequestError(format!("rate limited: {message}")),
            _ => LlmError::ProviderError(format!("HTTP {}: {message}", status.as_u16())),
        }
    }

    fn map_transport_error(&self, e: &reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::TimeoutError(format!(
                "no response within {}s",
                self.config.timeout.as_secs()
            ))
        } else {
            LlmError::RequestError(format!("request failed: {e}"))
        }
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl StructuredLlm for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete_structured(
        &self,
        request: &StructuredRequest,
    ) -> Result<StructuredResponse, LlmError> {
        let body = build_structured_request(request);
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        let parsed = parse_completion_response(&json)?;

        tracing::debug!(
            model = %request.model,
            schema = %request.schema_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "structured completion finished"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn request() -> StructuredRequest {
        StructuredRequest::new(
            "gpt-4o-mini",
            vec![Message::system("be brief"), Message::user("hi")],
            "turn",
            serde_json::json!({"type": "object"}),
        )
    }

    #[test]
    fn request_body_has_schema_and_ordered_messages() {
        let body = build_structured_request(&request().with_temperature(0.3));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "turn");
        assert_eq!(body["temperature"], 0.3);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn parse_response_extracts_object_and_usage() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "{\"speech_text\":\"ok\"}"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let parsed = parse_completion_response(&body).unwrap();
        assert_eq!(parsed.output["speech_text"], "ok");
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
        assert_eq!(parsed.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn missing_content_is_empty_response() {
        let body = serde_json::json!({"choices": [{"message": {"content": null}}]});
        assert!(matches!(
            parse_completion_response(&body),
            Err(LlmError::EmptyResponse(_))
        ));
    }

    #[test]
    fn http_errors_map_by_status() {
        let body = r#"{"error":{"message":"bad key"}}"#;
        let err = OpenAiAdapter::map_http_error(reqwest::StatusCode::UNAUTHORIZED, body);
        assert_eq!(err, LlmError::AuthError("authentication failed: bad key".into()));

        let err = OpenAiAdapter::map_http_error(reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(err, LlmError::ProviderError(m) if m.contains("502")));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = OpenAiConfig::new("k").with_base_url("http://localhost:8080/");
        assert_eq!(config.base_url, "http://localhost:8080");
    }

    #[test]
    fn config_requires_api_key() {
        let llm = LlmConfig {
            api_key: "sk-test".into(),
            timeout_secs: 7,
            ..LlmConfig::default()
        };
        let config = OpenAiConfig::from_llm_config(&llm).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(7));
    }
}

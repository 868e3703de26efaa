//! The model call that decides what to say and which tools to use.

use std::sync::Arc;

use super::error::{PipelineError, Result};
use super::types::IntentionResponse;
use crate::conversation::history::PromptData;
use crate::llm::error::LlmError;
use crate::llm::message::{Message, Role};
use crate::llm::provider::StructuredLlm;
use crate::llm::types::StructuredRequest;

/// Schema name reported to the provider.
pub const INTENTION_SCHEMA_NAME: &str = "glitchcube_turn";

/// JSON Schema for the structured turn answer.
pub fn intention_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "speech_text": {"type": "string"},
            "continue_conversation": {"type": "boolean"},
            "inner_thoughts": {"type": "string"},
            "current_mood": {"type": "string"},
            "pressing_questions": {"type": "string"},
            "goal_progress": {"type": "string"},
            "tool_intents": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "tool": {"type": "string"},
                        "intent": {"type": "string"}
                    },
                    "required": ["tool", "intent"]
                }
            },
            "direct_tool_calls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "tool_name": {"type": "string"},
                        "parameters": {"type": "object"}
                    },
                    "required": ["tool_name", "parameters"]
                }
            },
            "search_memories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "type": {"type": "string", "enum": ["all", "summaries", "events", "people"]},
                        "limit": {"type": "integer", "minimum": 1, "maximum": 10}
                    },
                    "required": ["query"]
                }
            }
        },
        "required": ["speech_text", "continue_conversation"]
    })
}

/// Message list in model order: system prompt, history, then the utterance.
pub fn build_messages(prompt: &PromptData, user_message: &str) -> Vec<Message> {
    let system = system_text(prompt);
    let mut messages = Vec::with_capacity(prompt.messages.len() + 2);
    if let Some(system) = system {
        messages.push(Message::system(system));
    }
    messages.extend(prompt.messages.iter().cloned());
    messages.push(Message::user(user_message));

    if system.is_some() && messages.first().map(|m| m.role) != Some(Role::System) {
        tracing::error!("system prompt supplied but first message is not a system message");
    }
    messages
}

/// The system prompt, if it has any content.
fn system_text(prompt: &PromptData) -> Option<&str> {
    prompt
        .system_prompt
        .as_deref()
        .filter(|s| !s.trim().is_empty())
}

/// Issues the structured turn call.
pub struct IntentionRequester {
    llm: Arc<dyn StructuredLlm>,
    temperature: Option<f64>,
    max_tokens: Option<usize>,
}

impl IntentionRequester {
    pub fn new(llm: Arc<dyn StructuredLlm>) -> Self {
        Self {
            llm,
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

    /// Ask the model for this turn's speech and tool choices.
    pub async fn request(
        &self,
        prompt: &PromptData,
        user_message: &str,
        model: &str,
    ) -> Result<IntentionResponse> {
        if user_message.trim().is_empty() {
            return Err(PipelineError::missing("user_message"));
        }
        if model.trim().is_empty() {
            return Err(PipelineError::missing("model"));
        }

        let mut request = StructuredRequest::new(
            model,
            build_messages(prompt, user_message),
            INTENTION_SCHEMA_NAME,
            intention_schema(),
        );
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }
        if let Some(m) = self.max_tokens {
            request = request.with_max_tokens(m);
        }

        tracing::debug!(
            provider = self.llm.name(),
            model,
            messages = request.messages.len(),
            "requesting turn intention"
        );
        let response = self.llm.complete_structured(&request).await?;

        if response.content.trim().is_empty() {
            return Err(LlmError::EmptyResponse("model returned empty content".into()).into());
        }
        if response.output.as_object().is_none_or(|o| o.is_empty()) {
            return Err(LlmError::EmptyResponse("model returned an empty object".into()).into());
        }

        serde_json::from_value(response.output).map_err(|e| {
            PipelineError::LlmCallFailed(LlmError::InvalidOutput(format!(
                "turn answer does not match schema: {e}"
            )))
        })
    }
}

//! Values passed between pipeline stages and the outbound wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::conversation::types::{Conversation, ToolIntention};
use crate::tools::types::{DirectToolCall, ToolCallResult};

/// Fallback speech when the model returns none.
pub const FALLBACK_SPEECH: &str = "I understand.";

/// Speech returned when a turn fails.
pub const ERROR_SPEECH: &str = "I'm sorry, I encountered an error processing your request.";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One inbound turn, independent of transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    /// User utterance.
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Conversation id of the voice front-end, echoed back in the response.
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Free-form context: `persona`, `device_id`, `source`, ...
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// SessionResolver output.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub conversation: Conversation,
    pub persona: String,
    /// Effective session id; differs from the request when staleness forced a new one.
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Model output
// ---------------------------------------------------------------------------

/// A memory lookup requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchRequest {
    pub query: String,
    #[serde(default, rename = "type")]
    pub scope: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// The structured object the model returns each turn.
///
/// Every field is optional on the wire so a partially conforming answer
/// still parses; blank speech is handled by the synthesizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentionResponse {
    #[serde(default)]
    pub speech_text: Option<String>,
    #[serde(default)]
    pub continue_conversation: bool,
    #[serde(default)]
    pub inner_thoughts: Option<String>,
    #[serde(default)]
    pub current_mood: Option<String>,
    #[serde(default)]
    pub pressing_questions: Option<String>,
    #[serde(default)]
    pub goal_progress: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_intents: Vec<ToolIntention>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub direct_tool_calls: Vec<DirectToolCall>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub search_memories: Vec<MemorySearchRequest>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

/// ActionExecutor output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResults {
    /// One entry per attempted synchronous call.
    pub sync_results: BTreeMap<String, ToolCallResult>,
    /// Intentions handed to the background worker.
    pub delegated_intents: Vec<ToolIntention>,
}

/// ResponseSynthesizer output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedResponse {
    /// Never blank.
    pub speech_text: String,
    pub continue_conversation: bool,
    pub inner_thoughts: Option<String>,
    pub current_mood: Option<String>,
    pub pressing_questions: Option<String>,
    pub goal_progress: Option<String>,
    /// Number of query results deferred to the next turn.
    pub deferred_results: usize,
}

// ---------------------------------------------------------------------------
// Outbound wire format
// ---------------------------------------------------------------------------

/// Kind of turn reported to the voice front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    ActionDone,
    QueryAnswer,
}

/// Finalizer output in the voice-assistant protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassResponse {
    pub continue_conversation: bool,
    /// Always `!continue_conversation`.
    pub end_conversation: bool,
    /// Present only when continuing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_delay: Option<u64>,
    pub conversation_id: String,
    pub response: HassResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassResponseBody {
    pub response_type: ResponseType,
    pub language: String,
    pub speech: Speech,
    pub data: ResponseData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speech {
    pub plain: PlainSpeech,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainSpeech {
    pub speech: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub targets: Vec<EntityTarget>,
    pub success: Vec<EntityState>,
    pub failed: Vec<EntityState>,
}

/// A tool described as a Home Assistant style entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTarget {
    pub entity_id: String,
    pub name: String,
    pub domain: String,
}

/// Placeholder state for an out-of-band action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub name: String,
    pub state: String,
}

impl HassResponse {
    /// Build a response, keeping `end_conversation` and `continue_delay`
    /// consistent with `continue_conversation`.
    pub fn new(
        conversation_id: impl Into<String>,
        language: impl Into<String>,
        speech: impl Into<String>,
        response_type: ResponseType,
        continue_conversation: bool,
        continue_delay_secs: u64,
        data: ResponseData,
    ) -> Self {
        Self {
            continue_conversation,
            end_conversation: !continue_conversation,
            continue_delay: continue_conversation.then_some(continue_delay_secs),
            conversation_id: conversation_id.into(),
            response: HassResponseBody {
                response_type,
                language: language.into(),
                speech: Speech {
                    plain: PlainSpeech {
                        speech: speech.into(),
                    },
                },
                data,
            },
        }
    }

    /// The spoken text.
    pub fn speech(&self) -> &str {
        &self.response.speech.plain.speech
    }
}

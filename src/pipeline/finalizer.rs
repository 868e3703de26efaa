//! Persists the turn, closes finished conversations, and formats the
//! voice-assistant response.
//!
//! Persistence here is best-effort: the response has already been computed
//! and is returned even when the store is down.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::actions::MEMORY_SEARCH_KEY;
use super::types::{
    ActionResults, EntityState, EntityTarget, HassResponse, ResponseData, ResponseType,
    SynthesizedResponse,
};
use crate::conversation::store::{ConversationStore, StoreError};
use crate::conversation::types::{Conversation, NewLogEntry, TurnMetadata, truncate_turn_text};

/// End reason recorded when the model lets the dialogue finish.
pub const NATURAL_END_REASON: &str = "natural_end";

/// State placed on delegated tools in the response.
pub const PENDING_STATE: &str = "pending";

/// Everything the finalizer needs from earlier stages.
#[derive(Debug, Clone)]
pub struct FinalizeInput<'a> {
    pub session_id: &'a str,
    pub user_message: &'a str,
    pub response: &'a SynthesizedResponse,
    pub actions: &'a ActionResults,
    pub conversation: &'a Conversation,
    /// Conversation id echoed back to the voice front-end.
    pub external_conversation_id: &'a str,
    pub language: &'a str,
}

/// Tool names grouped by how they ran this turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolClasses {
    pub sync_tools: Vec<String>,
    pub async_tools: Vec<String>,
    pub query_tools: Vec<String>,
    pub action_tools: Vec<String>,
}

impl ToolClasses {
    pub fn classify(actions: &ActionResults) -> Self {
        let sync_tools: Vec<String> = actions.sync_results.keys().cloned().collect();
        let async_tools: Vec<String> = actions
            .delegated_intents
            .iter()
            .map(|i| i.tool.clone())
            .collect();
        let (query_tools, action_tools): (Vec<String>, Vec<String>) = sync_tools
            .iter()
            .cloned()
            .partition(|name| name.starts_with(MEMORY_SEARCH_KEY));
        Self {
            sync_tools,
            async_tools,
            query_tools,
            action_tools,
        }
    }
}

pub struct Finalizer {
    store: Arc<dyn ConversationStore>,
    continue_delay_secs: u64,
}

impl Finalizer {
    pub fn new(store: Arc<dyn ConversationStore>, continue_delay_secs: u64) -> Self {
        Self {
            store,
            continue_delay_secs,
        }
    }

    pub fn finalize(&self, input: &FinalizeInput<'_>) -> HassResponse {
        let classes = ToolClasses::classify(input.actions);

        // Pending background work means the user may get a follow-up.
        let continue_conversation =
            input.response.continue_conversation || !classes.async_tools.is_empty();

        self.log_turn(input, &classes);

        if !continue_conversation && input.conversation.is_active() {
            self.end_conversation(input);
        }

        let response_type = if classes.async_tools.is_empty() {
            ResponseType::QueryAnswer
        } else {
            ResponseType::ActionDone
        };

        HassResponse::new(
            input.external_conversation_id,
            input.language,
            input.response.speech_text.clone(),
            response_type,
            continue_conversation,
            self.continue_delay_secs,
            response_data(&classes),
        )
    }

    fn log_turn(&self, input: &FinalizeInput<'_>, classes: &ToolClasses) {
        let tool_results = match serde_json::to_value(&input.actions.sync_results) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(session_id = input.session_id, error = %e, "could not serialize tool results");
                serde_json::Value::Object(serde_json::Map::new())
            }
        };
        let response = input.response;
        let entry = NewLogEntry {
            session_id: input.session_id.to_owned(),
            user_message: truncate_turn_text(input.user_message),
            ai_response: truncate_turn_text(&response.speech_text),
            tool_results,
            metadata: TurnMetadata {
                continue_conversation: response.continue_conversation,
                inner_thoughts: response.inner_thoughts.clone(),
                current_mood: response.current_mood.clone(),
                pressing_questions: response.pressing_questions.clone(),
                goal_progress: response.goal_progress.clone(),
                sync_tools: classes.sync_tools.clone(),
                async_tools: classes.async_tools.clone(),
                query_tools: classes.query_tools.clone(),
                action_tools: classes.action_tools.clone(),
                tool_intents: input.actions.delegated_intents.clone(),
                extra: serde_json::Map::new(),
            },
        };

        if let Err(e) = self.store.append_log(&entry) {
            log_persistence_failure(input.session_id, "turn log", &e);
        }
    }

    fn end_conversation(&self, input: &FinalizeInput<'_>) {
        match self.store.end(input.conversation.id, NATURAL_END_REASON) {
            Ok(true) => tracing::info!(session_id = input.session_id, "conversation ended"),
            Ok(false) => {}
            Err(e) => log_persistence_failure(input.session_id, "conversation end", &e),
        }
    }
}

fn log_persistence_failure(session_id: &str, what: &str, e: &StoreError) {
    if e.is_unavailable() {
        tracing::error!(session_id, what, error = %e, "store unavailable, dropping write");
    } else {
        tracing::warn!(session_id, what, error = %e, "write failed, continuing");
    }
}

fn response_data(classes: &ToolClasses) -> ResponseData {
    let mut seen = BTreeSet::new();
    let targets = classes
        .sync_tools
        .iter()
        .chain(&classes.async_tools)
        .filter(|name| seen.insert(name.as_str()))
        .map(|name| entity_target(name))
        .collect();

    let success = classes
        .async_tools
        .iter()
        .map(|name| EntityState {
            entity_id: name.clone(),
            name: humanize(name),
            state: PENDING_STATE.to_owned(),
        })
        .collect();

    ResponseData {
        targets,
        success,
        failed: Vec::new(),
    }
}

/// Describe a tool name as an entity: `light.turn_on` has domain `light`.
pub fn entity_target(tool_name: &str) -> EntityTarget {
    let domain = tool_name
        .split_once('.')
        .map_or(tool_name, |(domain, _)| domain);
    EntityTarget {
        entity_id: tool_name.to_owned(),
        name: humanize(tool_name),
        domain: domain.to_owned(),
    }
}

/// `light.turn_on` becomes `Light turn on`.
pub fn humanize(tool_name: &str) -> String {
    let spaced = tool_name.replace(['.', '_'], " ");
    let spaced = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

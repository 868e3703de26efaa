//! Turns the model answer and tool results into the spoken response.
//!
//! Query tool results are not spoken this turn. They are summarized into the
//! conversation's `pending_query_results` so the next system prompt can use
//! them.

use std::sync::Arc;

use super::types::{ActionResults, FALLBACK_SPEECH, IntentionResponse, SynthesizedResponse};
use crate::conversation::store::{ConversationStore, merge_metadata};
use crate::conversation::types::{
    Conversation, PENDING_QUERY_RESULTS_VERSION, PendingQueryResults,
};
use crate::tools::registry::ToolRegistry;

/// Builds the response and defers query results.
pub struct ResponseSynthesizer {
    store: Arc<dyn ConversationStore>,
    registry: Arc<ToolRegistry>,
}

impl ResponseSynthesizer {
    pub fn new(store: Arc<dyn ConversationStore>, registry: Arc<ToolRegistry>) -> Self {
        Self { store, registry }
    }

    /// Never fails; a metadata write failure is logged and dropped.
    pub fn synthesize(
        &self,
        answer: &IntentionResponse,
        actions: &ActionResults,
        conversation: &Conversation,
    ) -> SynthesizedResponse {
        let speech_text = match answer.speech_text.as_deref().map(str::trim) {
            Some(speech) if !speech.is_empty() => speech.to_owned(),
            _ => {
                tracing::debug!(session_id = %conversation.session_id, "blank speech, using fallback");
                FALLBACK_SPEECH.to_owned()
            }
        };

        let deferred_results = self.defer_query_results(actions, conversation);

        SynthesizedResponse {
            speech_text,
            continue_conversation: answer.continue_conversation,
            inner_thoughts: answer.inner_thoughts.clone(),
            current_mood: answer.current_mood.clone(),
            pressing_questions: answer.pressing_questions.clone(),
            goal_progress: answer.goal_progress.clone(),
            deferred_results,
        }
    }

    fn defer_query_results(&self, actions: &ActionResults, conversation: &Conversation) -> usize {
        let lines: Vec<String> = actions
            .sync_results
            .iter()
            .filter(|(_, result)| self.registry.is_query(&result.tool))
            .map(|(key, result)| format!("{key}: {}", result.detail()))
            .collect();
        if lines.is_empty() {
            return 0;
        }

        let pending = PendingQueryResults {
            version: PENDING_QUERY_RESULTS_VERSION,
            results_summary: lines.join("\n"),
            tool_count: lines.len(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        };
        let count = pending.tool_count;

        match merge_metadata(self.store.as_ref(), conversation.id, |meta| {
            meta.pending_query_results = Some(pending.clone());
        }) {
            Ok(_) => {
                tracing::debug!(
                    session_id = %conversation.session_id,
                    count,
                    "query results deferred to next turn"
                );
                count
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %conversation.session_id,
                    error = %e,
                    "could not store pending query results"
                );
                0
            }
        }
    }
}

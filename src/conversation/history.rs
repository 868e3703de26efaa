//! Prompt assembly: system prompt plus reconstructed turn history.
//!
//! The system prompt is built from three layers:
//!
//! 1. The persona prompt from [`PersonaLibrary`].
//! 2. The tool catalogue from the [`ToolRegistry`].
//! 3. Deferred query results left by the previous turn, if any. These are
//!    cleared from the conversation metadata as they are read so they
//!    surface exactly once.

use std::sync::Arc;

use super::store::{ConversationStore, merge_metadata};
use super::types::{Conversation, PendingQueryResults};
use crate::llm::message::Message;
use crate::persona::PersonaLibrary;
use crate::tools::registry::ToolRegistry;

/// Instructions describing the structured answer fields.
pub const RESPONSE_GUIDE: &str = "\
Answer with a JSON object. speech_text is what you say out loud. \
Set continue_conversation to true when you expect a reply. \
Use tool_intents for lights, effects and announcements (they run after you speak). \
Use direct_tool_calls only for tools you need right now with exact parameters. \
Use search_memories to look things up; results arrive on the next turn.";

/// Everything the intention stage needs to call the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptData {
    pub system_prompt: Option<String>,
    /// Prior turns, oldest first.
    pub messages: Vec<Message>,
}

/// Builds [`PromptData`] for a conversation.
pub struct PromptBuilder {
    store: Arc<dyn ConversationStore>,
    personas: PersonaLibrary,
    registry: Arc<ToolRegistry>,
    history_turns: usize,
}

impl PromptBuilder {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        personas: PersonaLibrary,
        registry: Arc<ToolRegistry>,
        history_turns: usize,
    ) -> Self {
        Self {
            store,
            personas,
            registry,
            history_turns,
        }
    }

    /// Assemble prompt data. Store failures degrade to an emptier prompt.
    pub fn build(&self, conversation: &Conversation, persona: &str) -> PromptData {
        let pending = self.take_pending_results(conversation);
        let system_prompt = self.system_prompt(persona, pending.as_ref());
        let messages = self.history(&conversation.session_id);
        PromptData {
            system_prompt: Some(system_prompt),
            messages,
        }
    }

    fn system_prompt(&self, persona: &str, pending: Option<&PendingQueryResults>) -> String {
        let mut parts = vec![self.personas.assemble_prompt(persona)];

        let catalogue = self.registry.catalogue();
        if !catalogue.is_empty() {
            parts.push(format!("Available tools:\n{catalogue}"));
        }
        parts.push(RESPONSE_GUIDE.to_owned());

        if let Some(pending) = pending {
            parts.push(format!(
                "Results from your lookups last turn (share them if they help):\n{}",
                pending.results_summary
            ));
        }
        parts.join("\n\n")
    }

    fn history(&self, session_id: &str) -> Vec<Message> {
        let entries = match self.store.recent_logs(session_id, self.history_turns) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "could not load turn history");
                return Vec::new();
            }
        };

        let mut messages = Vec::with_capacity(entries.len() * 2);
        for entry in entries {
            if !entry.user_message.trim().is_empty() {
                messages.push(Message::user(entry.user_message));
            }
            if !entry.ai_response.trim().is_empty() {
                messages.push(Message::assistant(entry.ai_response));
            }
        }
        messages
    }

    /// Read and clear `pending_query_results`.
    fn take_pending_results(&self, conversation: &Conversation) -> Option<PendingQueryResults> {
        conversation.metadata.pending_query_results.as_ref()?;

        let mut taken = None;
        let result = merge_metadata(self.store.as_ref(), conversation.id, |meta| {
            taken = meta.pending_query_results.take();
        });
        match result {
            Ok(_) => taken,
            Err(e) => {
                // Not cleared: it may surface again next turn, which beats losing it.
                tracing::warn!(
                    session_id = %conversation.session_id,
                    error = %e,
                    "could not clear pending query results"
                );
                conversation.metadata.pending_query_results.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::time::Duration;

    use super::*;
    use crate::conversation::sqlite::SqliteStore;
    use crate::conversation::types::{NewConversation, NewLogEntry};
    use crate::llm::message::Role;

    fn setup() -> (Arc<SqliteStore>, PromptBuilder) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let registry = Arc::new(ToolRegistry::new(Duration::from_secs(1)));
        let builder = PromptBuilder::new(
            Arc::clone(&store) as Arc<dyn ConversationStore>,
            PersonaLibrary::new(None),
            registry,
            2,
        );
        (store, builder)
    }

    fn turn(session_id: &str, n: u32) -> NewLogEntry {
        NewLogEntry {
            session_id: session_id.to_owned(),
            user_message: format!("question {n}"),
            ai_response: format!("answer {n}"),
            ..NewLogEntry::default()
        }
    }

    #[test]
    fn history_is_limited_and_oldest_first() {
        let (store, builder) = setup();
        let conv = store
            .create(&NewConversation {
                session_id: "s".into(),
                ..NewConversation::default()
            })
            .unwrap();
        for n in 1..=3 {
            store.append_log_at(&turn("s", n), u64::from(n) * 10).unwrap();
        }

        let data = builder.build(&conv, "buddy");
        let contents: Vec<&str> = data.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question 2", "answer 2", "question 3", "answer 3"]);
        assert_eq!(data.messages[0].role, Role::User);
        assert_eq!(data.messages[1].role, Role::Assistant);
        assert!(data.system_prompt.unwrap().contains("\"buddy\""));
    }

    #[test]
    fn pending_results_surface_once() {
        let (store, builder) = setup();
        let conv = store
            .create(&NewConversation {
                session_id: "s".into(),
                ..NewConversation::default()
            })
            .unwrap();
        let conv = merge_metadata(store.as_ref(), conv.id, |meta| {
            meta.pending_query_results = Some(PendingQueryResults {
                version: 1,
                results_summary: "memory_search_1: Rex fixed the filter".into(),
                tool_count: 1,
                stored_at: "2025-08-30T00:00:00Z".into(),
            });
        })
        .unwrap();

        let first = builder.build(&conv, "buddy");
        assert!(first.system_prompt.unwrap().contains("Rex fixed the filter"));

        let reloaded = store.get(conv.id).unwrap().unwrap();
        assert!(reloaded.metadata.pending_query_results.is_none());
        let second = builder.build(&reloaded, "buddy");
        assert!(!second.system_prompt.unwrap().contains("Rex fixed the filter"));
    }
}

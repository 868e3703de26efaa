//! Runs the tools a turn asked for.
//!
//! Direct tool calls and memory searches run now, concurrently, and their
//! results feed the response. Natural-language tool intentions are handed to
//! the background worker and never awaited.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::{join, join_all};

use super::error::{PipelineError, Result};
use super::types::{ActionResults, IntentionResponse, MemorySearchRequest};
use crate::conversation::types::ToolIntention;
use crate::dispatch::queue::{IntentDispatcher, ToolIntentDispatch, build_instruction};
use crate::tools::memory_search::MEMORY_SEARCH_TOOL;
use crate::tools::registry::ToolRegistry;
use crate::tools::types::{DirectToolCall, ToolCallResult};

/// Key prefix for memory search results.
pub const MEMORY_SEARCH_KEY: &str = "memory_search";

/// Executes direct calls and memory searches; delegates intentions.
pub struct ActionExecutor {
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<dyn IntentDispatcher>,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ToolRegistry>, dispatcher: Arc<dyn IntentDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub async fn execute(
        &self,
        response: &IntentionResponse,
        session_id: &str,
        conversation_id: i64,
        user_message: &str,
    ) -> Result<ActionResults> {
        if session_id.trim().is_empty() {
            return Err(PipelineError::missing("session_id"));
        }

        let (direct, searches) = join(
            self.run_direct_calls(&response.direct_tool_calls),
            self.run_memory_searches(&response.search_memories),
        )
        .await;

        let mut sync_results = BTreeMap::new();
        for (key, result) in direct.into_iter().chain(searches) {
            insert_unique(&mut sync_results, key, result);
        }

        let delegated_intents =
            self.delegate(&response.tool_intents, session_id, conversation_id, user_message);

        let failed = sync_results.values().filter(|r| !r.success).count();
        tracing::info!(
            session_id,
            sync = sync_results.len(),
            failed,
            delegated = delegated_intents.len(),
            "actions complete"
        );

        Ok(ActionResults {
            sync_results,
            delegated_intents,
        })
    }

    async fn run_direct_calls(&self, calls: &[DirectToolCall]) -> Vec<(String, ToolCallResult)> {
        let results = join_all(
            calls
                .iter()
                .map(|call| self.registry.invoke(&call.tool_name, call.parameters.clone())),
        )
        .await;
        calls
            .iter()
            .map(|call| call.tool_name.clone())
            .zip(results)
            .collect()
    }

    async fn run_memory_searches(
        &self,
        searches: &[MemorySearchRequest],
    ) -> Vec<(String, ToolCallResult)> {
        let results = join_all(searches.iter().map(|search| {
            let mut args = serde_json::json!({ "query": search.query });
            if let Some(scope) = &search.scope {
                args["type"] = serde_json::Value::from(scope.as_str());
            }
            if let Some(limit) = search.limit {
                args["limit"] = serde_json::Value::from(limit);
            }
            self.registry.invoke(MEMORY_SEARCH_TOOL, args)
        }))
        .await;

        results
            .into_iter()
            .enumerate()
            .map(|(i, result)| (format!("{MEMORY_SEARCH_KEY}_{}", i + 1), result))
            .collect()
    }

    /// Queue intentions for the worker. Returns the intentions it accepted.
    fn delegate(
        &self,
        intents: &[ToolIntention],
        session_id: &str,
        conversation_id: i64,
        user_message: &str,
    ) -> Vec<ToolIntention> {
        let intents: Vec<ToolIntention> = intents
            .iter()
            .filter(|i| !i.tool.trim().is_empty() && !i.intent.trim().is_empty())
            .cloned()
            .collect();
        if intents.is_empty() {
            return intents;
        }

        let command = ToolIntentDispatch {
            instruction: build_instruction(user_message, &intents),
            intentions: intents.clone(),
            session_id: session_id.to_owned(),
            conversation_id,
            user_message: user_message.to_owned(),
        };
        match self.dispatcher.dispatch(command) {
            Ok(()) => intents,
            Err(e) => {
                tracing::warn!(session_id, code = e.code(), error = %e, "tool intentions dropped");
                Vec::new()
            }
        }
    }
}

/// Insert under `key`, or `<key>_2`, `<key>_3`, ... when taken.
fn insert_unique(
    results: &mut BTreeMap<String, ToolCallResult>,
    key: String,
    result: ToolCallResult,
) {
    if !results.contains_key(&key) {
        results.insert(key, result);
        return;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{key}_{n}");
        if !results.contains_key(&candidate) {
            results.insert(candidate, result);
            return;
        }
        n += 1;
    }
}

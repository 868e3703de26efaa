//! `search_memories` tool backed by the memory store.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{Tool, ToolError, ToolIntent, ToolOutput};
use crate::conversation::store::MemoryStore;
use crate::conversation::types::MemoryScope;

/// Registry name of the memory search tool.
pub const MEMORY_SEARCH_TOOL: &str = "search_memories";

/// Default number of hits returned.
pub const DEFAULT_LIMIT: usize = 5;
/// Upper bound on hits returned.
pub const MAX_LIMIT: usize = 10;

/// Searches stored memories and conversation summaries.
pub struct MemorySearchTool {
    store: Arc<dyn MemoryStore>,
}

impl MemorySearchTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

/// Clamp a requested limit into `1..=MAX_LIMIT`, defaulting when absent.
pub fn clamp_limit(requested: Option<u64>) -> usize {
    match requested {
        None => DEFAULT_LIMIT,
        Some(n) => usize::try_from(n).unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT),
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        MEMORY_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search past events, people the cube has met, and conversation summaries"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"},
                "type": {"type": "string", "enum": ["all", "summaries", "events", "people"]},
                "limit": {"type": "integer", "minimum": 1, "maximum": MAX_LIMIT}
            },
            "required": ["query"]
        })
    }

    fn intent(&self) -> ToolIntent {
        ToolIntent::Query
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = args
            .get("query")
            .and_then(|q| q.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("query is required".into()))?
            .to_owned();
        let scope = args
            .get("type")
            .and_then(|t| t.as_str())
            .map(MemoryScope::parse_lenient)
            .unwrap_or_default();
        let limit = clamp_limit(args.get("limit").and_then(|l| l.as_u64()));

        let store = Arc::clone(&self.store);
        let search_query = query.clone();
        let hits = tokio::task::spawn_blocking(move || {
            store.search_memories(&search_query, scope, limit)
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("search task failed: {e}")))?
        .map_err(|e| {
            if e.is_unavailable() {
                ToolError::Unavailable(e.to_string())
            } else {
                ToolError::ExecutionFailed(e.to_string())
            }
        })?;

        let message = if hits.is_empty() {
            format!("No memories found for \"{query}\"")
        } else {
            let snippets: Vec<String> = hits
                .iter()
                .map(|h| format!("[{}] {}", h.source, h.text))
                .collect();
            format!(
                "Found {} memories for \"{query}\": {}",
                hits.len(),
                snippets.join(" | ")
            )
        };

        Ok(ToolOutput::message(message).with_data(serde_json::json!({
            "query": query,
            "count": hits.len(),
            "results": hits,
        })))
    }
}

//! Tool registry with intent classification and bounded invocation.
//!
//! The [`ToolRegistry`] holds registered tools, provides lookup by name,
//! classifies tools by their declared [`ToolIntent`], exports schemas for
//! prompts, and invokes tools so that every call yields exactly one
//! [`ToolCallResult`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::{Tool, ToolCallResult, ToolError, ToolIntent};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_available())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry with a per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous handler replaced");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists in the registry.
    pub fn exists(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted names of all registered tools.
    pub fn list_available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Declared intent of a tool, `None` if unregistered.
    pub fn intent_of(&self, name: &str) -> Option<ToolIntent> {
        self.tools.get(name).map(|t| t.intent())
    }

    /// Whether `name` is a registered query tool.
    pub fn is_query(&self, name: &str) -> bool {
        self.intent_of(name) == Some(ToolIntent::Query)
    }

    /// Sorted names of all registered tools with the given intent.
    pub fn names_with_intent(&self, intent: ToolIntent) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tools
            .values()
            .filter(|t| t.intent() == intent)
            .map(|t| t.name())
            .collect();
        names.sort_unstable();
        names
    }

    /// Export schemas for tools, optionally filtered by intent.
    ///
    /// Each entry contains `name`, `description`, `intent`, and `parameters`.
    pub fn schemas_for_api(&self, intent: Option<ToolIntent>) -> Vec<serde_json::Value> {
        let mut schemas: Vec<(String, serde_json::Value)> = self
            .tools
            .values()
            .filter(|t| intent.is_none_or(|i| t.intent() == i))
            .map(|t| {
                let entry = serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "intent": t.intent(),
                    "parameters": t.schema(),
                });
                (t.name().to_string(), entry)
            })
            .collect();
        schemas.sort_by(|a, b| a.0.cmp(&b.0));
        schemas.into_iter().map(|(_, v)| v).collect()
    }

    /// One line per tool for the system prompt: `- name (intent): description`.
    pub fn catalogue(&self) -> String {
        self.list_available()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| {
                let intent = match t.intent() {
                    ToolIntent::Query => "query",
                    ToolIntent::Action => "action",
                };
                format!("- {} ({intent}): {}", t.name(), t.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Invoke a tool. Never fails: unknown tools, tool errors, timeouts and
    /// panics all become failure records.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> ToolCallResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = %name, "call to unregistered tool");
            return ToolCallResult::failure(name, ToolError::NotFound(name.to_owned()).to_string());
        };

        let started = Instant::now();
        let mut handle = tokio::spawn(async move { tool.execute(args).await });

        let result = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => ToolCallResult::success(name, output),
            Ok(Ok(Err(e))) => {
                tracing::warn!(tool = %name, error = %e, "tool execution failed");
                ToolCallResult::failure(name, e.to_string())
            }
            Ok(Err(join_err)) => {
                tracing::error!(tool = %name, error = %join_err, "tool execution panicked");
                ToolCallResult::failure(name, format!("execution panicked: {join_err}"))
            }
            Err(_elapsed) => {
                // A timed-out action must not land later.
                handle.abort();
                tracing::error!(tool = %name, timeout = ?self.timeout, "tool execution timed out");
                ToolCallResult::failure(
                    name,
                    ToolError::Timeout(format!("no result after {:?}", self.timeout)).to_string(),
                )
            }
        };

        tracing::debug!(
            tool = %name,
            success = result.success,
            duration_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );
        result
    }
}

//! Background consumer that turns tool intentions into concrete calls.
//!
//! For each [`ToolIntentDispatch`] the worker asks the model to translate the
//! combined instruction into `direct_tool_calls` against the registered
//! action tools, then runs those calls through the registry. Outcomes are
//! logged; nothing flows back to the turn that produced the intentions.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::queue::ToolIntentDispatch;
use crate::llm::message::Message;
use crate::llm::provider::StructuredLlm;
use crate::llm::types::StructuredRequest;
use crate::tools::registry::ToolRegistry;
use crate::tools::types::{DirectToolCall, ToolCallResult, ToolIntent};

/// Schema name for the worker's structured call.
pub const EXECUTION_SCHEMA_NAME: &str = "tool_execution_plan";

/// Planning calls per command, including the first.
const PLAN_ATTEMPTS: u32 = 2;

/// JSON Schema for the worker's structured answer.
pub fn execution_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
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
            }
        },
        "required": ["direct_tool_calls"]
    })
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionPlan {
    #[serde(default)]
    direct_tool_calls: Vec<DirectToolCall>,
}

/// Consumes the intention queue until cancelled or the queue closes.
pub struct IntentWorker {
    llm: Arc<dyn StructuredLlm>,
    registry: Arc<ToolRegistry>,
    model: String,
    rx: mpsc::Receiver<ToolIntentDispatch>,
    cancel: CancellationToken,
}

impl IntentWorker {
    pub fn new(
        llm: Arc<dyn StructuredLlm>,
        registry: Arc<ToolRegistry>,
        model: impl Into<String>,
        rx: mpsc::Receiver<ToolIntentDispatch>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            llm,
            registry,
            model: model.into(),
            rx,
            cancel,
        }
    }

    /// Spawn the worker on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands one at a time until cancelled.
    pub async fn run(mut self) {
        tracing::info!("intention worker started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("intention worker cancelled");
                    break;
                }
                next = self.rx.recv() => {
                    match next {
                        Some(command) => {
                            self.process(&command).await;
                        }
                        None => {
                            tracing::info!("intention queue closed, worker exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Plan and execute one command. Returns every call's result.
    pub async fn process(&self, command: &ToolIntentDispatch) -> Vec<ToolCallResult> {
        let mut attempt = 1;
        let calls = loop {
            match self.plan(command).await {
                Ok(calls) => break calls,
                Err(e) if e.is_retryable() && attempt < PLAN_ATTEMPTS => {
                    tracing::debug!(
                        session_id = %command.session_id,
                        attempt,
                        code = e.code(),
                        "retrying intention plan"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %command.session_id,
                        code = e.code(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "could not plan tool intentions"
                    );
                    return Vec::new();
                }
            }
        };

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if self.registry.intent_of(&call.tool_name) == Some(ToolIntent::Query) {
                tracing::debug!(tool = %call.tool_name, "skipping query tool in intention plan");
                continue;
            }
            let result = self.registry.invoke(&call.tool_name, call.parameters).await;
            if result.success {
                tracing::info!(session_id = %command.session_id, tool = %result.tool, "intention executed");
            } else {
                tracing::warn!(
                    session_id = %command.session_id,
                    tool = %result.tool,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "intention failed"
                );
            }
            results.push(result);
        }
        results
    }

    async fn plan(
        &self,
        command: &ToolIntentDispatch,
    ) -> Result<Vec<DirectToolCall>, crate::llm::error::LlmError> {
        let tools = serde_json::Value::Array(self.registry.schemas_for_api(Some(ToolIntent::Action)));
        let system = format!(
            "You operate GlitchCube's lights, effects and speakers. Translate the request into \
             direct_tool_calls using only these tools, with exact parameters. Return an empty list \
             if nothing applies.\nTools: {tools}"
        );
        let request = StructuredRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(command.instruction.clone())],
            EXECUTION_SCHEMA_NAME,
            execution_schema(),
        )
        .with_temperature(0.0);

        let response = self.llm.complete_structured(&request).await?;
        let plan: ExecutionPlan = serde_json::from_value(response.output).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "malformed execution plan");
            ExecutionPlan::default()
        });
        Ok(plan.direct_tool_calls)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::conversation::types::ToolIntention;
    use crate::llm::error::LlmError;
    use crate::llm::types::StructuredResponse;
    use crate::tools::types::{Tool, ToolError, ToolOutput};

    struct PlannedLlm {
        output: serde_json::Value,
        /// Returned, in order, before `output` is.
        failures: Mutex<Vec<LlmError>>,
        seen: Mutex<Vec<StructuredRequest>>,
    }

    #[async_trait]
    impl StructuredLlm for PlannedLlm {
        fn name(&self) -> &str {
            "planned"
        }
        async fn complete_structured(
            &self,
            request: &StructuredRequest,
        ) -> Result<StructuredResponse, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
            Ok(StructuredResponse {
                content: self.output.to_string(),
                output: self.output.clone(),
                model: None,
                usage: None,
            })
        }
    }

    struct RecordingTool {
        name: &'static str,
        intent: ToolIntent,
        calls: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "records calls"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn intent(&self) -> ToolIntent {
            self.intent
        }
        async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
            self.calls.lock().unwrap().push(args);
            Ok(ToolOutput::message("ok"))
        }
    }

    fn command() -> ToolIntentDispatch {
        ToolIntentDispatch {
            instruction: "User said: \"lights\". Carry out: lights: turn on red".into(),
            intentions: vec![ToolIntention {
                tool: "lights".into(),
                intent: "turn on red".into(),
            }],
            session_id: "abc".into(),
            conversation_id: 1,
            user_message: "lights".into(),
        }
    }

    fn setup(output: serde_json::Value) -> (Arc<PlannedLlm>, Arc<Mutex<Vec<serde_json::Value>>>, Arc<ToolRegistry>) {
        let llm = Arc::new(PlannedLlm {
            output,
            failures: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        });
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(Arc::new(RecordingTool {
            name: "light.turn_on",
            intent: ToolIntent::Action,
            calls: Arc::clone(&calls),
        }));
        registry.register(Arc::new(RecordingTool {
            name: "search_memories",
            intent: ToolIntent::Query,
            calls: Arc::clone(&calls),
        }));
        (llm, calls, Arc::new(registry))
    }

    #[tokio::test]
    async fn process_executes_planned_action_calls() {
        let (llm, calls, registry) = setup(serde_json::json!({
            "direct_tool_calls": [
                {"tool_name": "light.turn_on", "parameters": {"entity_id": "light.cube", "rgb_color": [255, 0, 0]}},
                {"tool_name": "search_memories", "parameters": {"query": "x"}},
                {"tool_name": "bogus_tool", "parameters": {}}
            ]
        }));
        let (_tx, rx) = mpsc::channel(1);
        let worker = IntentWorker::new(llm.clone(), registry, "m", rx, CancellationToken::new());

        let results = worker.process(&command()).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(calls.lock().unwrap().len(), 1);

        let seen = llm.seen.lock().unwrap();
        let system = &seen[0].messages[0].content;
        assert!(system.contains("light.turn_on"));
        assert!(!system.contains("search_memories"));
    }

    #[tokio::test]
    async fn transient_plan_failure_is_retried_once() {
        let (llm, calls, registry) = setup(serde_json::json!({
            "direct_tool_calls": [{"tool_name": "light.turn_on", "parameters": {}}]
        }));
        llm.failures
            .lock()
            .unwrap()
            .push(LlmError::TimeoutError("slow".into()));
        let (_tx, rx) = mpsc::channel(1);
        let worker = IntentWorker::new(llm.clone(), registry, "m", rx, CancellationToken::new());

        let results = worker.process(&command()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(llm.seen.lock().unwrap().len(), 2);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let (llm, calls, registry) = setup(serde_json::json!({"direct_tool_calls": []}));
        llm.failures
            .lock()
            .unwrap()
            .push(LlmError::AuthError("bad key".into()));
        let (_tx, rx) = mpsc::channel(1);
        let worker = IntentWorker::new(llm.clone(), registry, "m", rx, CancellationToken::new());

        assert!(worker.process(&command()).await.is_empty());
        assert_eq!(llm.seen.lock().unwrap().len(), 1);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistent_failure_gives_up_after_retry() {
        let (llm, _calls, registry) = setup(serde_json::json!({"direct_tool_calls": []}));
        llm.failures.lock().unwrap().extend([
            LlmError::ProviderError("HTTP 503".into()),
            LlmError::ProviderError("HTTP 503".into()),
            LlmError::ProviderError("HTTP 503".into()),
        ]);
        let (_tx, rx) = mpsc::channel(1);
        let worker = IntentWorker::new(llm.clone(), registry, "m", rx, CancellationToken::new());

        assert!(worker.process(&command()).await.is_empty());
        assert_eq!(llm.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (llm, _calls, registry) = setup(serde_json::json!({"direct_tool_calls": []}));
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = IntentWorker::new(llm, registry, "m", rx, cancel.clone()).spawn();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn run_drains_queue_then_exits_when_closed() {
        let (llm, calls, registry) = setup(serde_json::json!({
            "direct_tool_calls": [{"tool_name": "light.turn_on", "parameters": {}}]
        }));
        let (tx, rx) = mpsc::channel(4);
        tx.send(command()).await.unwrap();
        tx.send(command()).await.unwrap();
        drop(tx);

        IntentWorker::new(llm, registry, "m", rx, CancellationToken::new())
            .run()
            .await;
        assert_eq!(calls.lock().unwrap().len(), 2);
    }
}

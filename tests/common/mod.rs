//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use glitchcube::conversation::sqlite::SqliteStore;
use glitchcube::dispatch::{ToolIntentDispatch, channel};
use glitchcube::llm::{LlmError, Message, StructuredLlm, StructuredRequest, StructuredResponse};
use glitchcube::persona::{PersonaLibrary, SharedPersonaState};
use glitchcube::tools::{MemorySearchTool, ToolRegistry};
use glitchcube::{CubeConfig, PipelineDeps, TurnPipeline, TurnRequest};
use tokio::sync::mpsc::Receiver;

/// Model double that replays scripted answers and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<Vec<Result<serde_json::Value, LlmError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<serde_json::Value, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Messages sent on each call, oldest call first.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuredLlm for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete_structured(
        &self,
        request: &StructuredRequest,
    ) -> Result<StructuredResponse, LlmError> {
        self.requests.lock().unwrap().push(request.messages.clone());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(LlmError::EmptyResponse("script exhausted".into()));
        }
        let output = replies.remove(0)?;
        Ok(StructuredResponse {
            content: output.to_string(),
            output,
            model: Some("scripted".into()),
            usage: None,
        })
    }
}

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub llm: Arc<ScriptedLlm>,
    pub pipeline: Arc<TurnPipeline>,
    pub intents: Receiver<ToolIntentDispatch>,
}

/// Pipeline over an in-memory store with the memory search tool registered.
pub fn harness(replies: Vec<Result<serde_json::Value, LlmError>>) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let llm = Arc::new(ScriptedLlm::new(replies));

    let mut registry = ToolRegistry::new(Duration::from_secs(2));
    registry.register(Arc::new(MemorySearchTool::new(store.clone())));

    let (dispatcher, intents) = channel(16);
    let deps = PipelineDeps {
        store: store.clone(),
        llm: llm.clone(),
        registry: Arc::new(registry),
        dispatcher: Arc::new(dispatcher),
        persona_state: Arc::new(SharedPersonaState::new("buddy")),
        personas: PersonaLibrary::new(None),
    };
    let pipeline = Arc::new(TurnPipeline::new(deps, &CubeConfig::default()));

    Harness {
        store,
        llm,
        pipeline,
        intents,
    }
}

pub fn turn(session_id: &str, text: &str) -> TurnRequest {
    TurnRequest {
        session_id: session_id.into(),
        text: text.into(),
        ..TurnRequest::default()
    }
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

//! Drives one turn through every stage.
//!
//! Setup, intention, actions and synthesis short-circuit on failure; the
//! caller then gets the fixed apology with a conversation-ending signal.
//! Finalizer persistence failures never reach the caller.

use std::sync::Arc;

use tracing::Instrument;

use super::actions::ActionExecutor;
use super::error::{PipelineError, Stage};
use super::finalizer::{FinalizeInput, Finalizer};
use super::intention::IntentionRequester;
use super::setup::SessionResolver;
use super::synthesis::ResponseSynthesizer;
use super::types::{ERROR_SPEECH, HassResponse, ResponseData, ResponseType, TurnRequest};
use crate::config::CubeConfig;
use crate::conversation::history::PromptBuilder;
use crate::conversation::store::ConversationStore;
use crate::dispatch::queue::IntentDispatcher;
use crate::llm::provider::StructuredLlm;
use crate::persona::{PersonaLibrary, PersonaState};
use crate::tools::registry::ToolRegistry;

/// Collaborators the pipeline is built from.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn ConversationStore>,
    pub llm: Arc<dyn StructuredLlm>,
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<dyn IntentDispatcher>,
    pub persona_state: Arc<dyn PersonaState>,
    pub personas: PersonaLibrary,
}

/// Result of one turn. `response` is always populated.
#[derive(Debug)]
pub struct TurnOutcome {
    pub response: HassResponse,
    /// Effective session id. Differs from the request after a staleness reset.
    pub session_id: String,
    /// Set when the turn failed and `response` is the apology.
    pub error: Option<PipelineError>,
}

impl TurnOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The conversation turn pipeline.
pub struct TurnPipeline {
    resolver: SessionResolver,
    prompts: PromptBuilder,
    intention: IntentionRequester,
    actions: ActionExecutor,
    synthesizer: ResponseSynthesizer,
    finalizer: Finalizer,
    model: String,
    default_language: String,
}

impl TurnPipeline {
    pub fn new(deps: PipelineDeps, config: &CubeConfig) -> Self {
        let resolver = SessionResolver::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.persona_state),
            config.conversation.staleness_window_secs,
        );
        let prompts = PromptBuilder::new(
            Arc::clone(&deps.store),
            deps.personas,
            Arc::clone(&deps.registry),
            config.llm.history_turns,
        );
        let intention = IntentionRequester::new(deps.llm)
            .with_temperature(config.llm.temperature)
            .with_max_tokens(config.llm.max_tokens);
        let actions = ActionExecutor::new(Arc::clone(&deps.registry), deps.dispatcher);
        let synthesizer = ResponseSynthesizer::new(Arc::clone(&deps.store), deps.registry);
        let finalizer = Finalizer::new(deps.store, config.conversation.continue_delay_secs);

        Self {
            resolver,
            prompts,
            intention,
            actions,
            synthesizer,
            finalizer,
            model: config.llm.model.clone(),
            default_language: config.server.default_language.clone(),
        }
    }

    /// Process one turn. Never fails; errors are reported in the outcome.
    pub async fn handle(&self, request: TurnRequest) -> TurnOutcome {
        let span = tracing::info_span!("turn", session_id = %request.session_id);
        self.handle_inner(request).instrument(span).await
    }

    async fn handle_inner(&self, request: TurnRequest) -> TurnOutcome {
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.default_language)
            .to_owned();
        let external_id = request
            .conversation_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| request.session_id.clone());

        match self.run(&request, &external_id, &language).await {
            Ok((session_id, response)) => TurnOutcome {
                response,
                session_id,
                error: None,
            },
            Err((stage, error)) => {
                tracing::error!(%stage, code = error.code(), error = %error, "turn failed");
                TurnOutcome {
                    response: HassResponse::new(
                        external_id,
                        language,
                        ERROR_SPEECH,
                        ResponseType::QueryAnswer,
                        false,
                        0,
                        ResponseData::default(),
                    ),
                    session_id: request.session_id,
                    error: Some(error),
                }
            }
        }
    }

    async fn run(
        &self,
        request: &TurnRequest,
        external_id: &str,
        language: &str,
    ) -> Result<(String, HassResponse), (Stage, PipelineError)> {
        let mut context = request.context.clone();
        if let Some(agent_id) = &request.agent_id {
            context
                .entry("agent_id")
                .or_insert_with(|| serde_json::Value::from(agent_id.as_str()));
        }

        let session = self
            .resolver
            .resolve(&request.session_id, Some(&context))
            .map_err(|e| (Stage::Setup, e))?;

        let prompt = self.prompts.build(&session.conversation, &session.persona);

        let answer = self
            .intention
            .request(&prompt, &request.text, &self.model)
            .await
            .map_err(|e| (Stage::Intention, e))?;

        let actions = self
            .actions
            .execute(
                &answer,
                &session.session_id,
                session.conversation.id,
                &request.text,
            )
            .await
            .map_err(|e| (Stage::Actions, e))?;

        let synthesized = self
            .synthesizer
            .synthesize(&answer, &actions, &session.conversation);

        let response = self.finalizer.finalize(&FinalizeInput {
            session_id: &session.session_id,
            user_message: &request.text,
            response: &synthesized,
            actions: &actions,
            conversation: &session.conversation,
            external_conversation_id: external_id,
            language,
        });

        tracing::info!(
            session_id = %session.session_id,
            continue_conversation = response.continue_conversation,
            "turn complete"
        );
        Ok((session.session_id, response))
    }
}

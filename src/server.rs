//! HTTP front door for the voice assistant integration.
//!
//! ## Endpoints
//!
//! - `POST /api/v1/conversation`: run one turn.
//!
//! A turn that fails inside the pipeline still answers `200` with
//! `success: true`, so the front-end speaks the apology. Only a request that
//! cannot be parsed gets a `400`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::CubeError;
use crate::pipeline::orchestrator::{TurnOutcome, TurnPipeline};
use crate::pipeline::types::TurnRequest;

/// Route for conversation turns.
pub const CONVERSATION_PATH: &str = "/api/v1/conversation";

/// Prefix applied to front-end conversation ids when no session id is sent.
pub const VOICE_SESSION_PREFIX: &str = "voice_";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/conversation`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationRequest {
    /// User utterance.
    pub message: String,
    #[serde(default)]
    pub context: RequestContext,
}

/// Request context sent by the voice front-end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub voice_interaction: Option<bool>,
    /// ISO 8601 timestamp from the sender. Logged only.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Persona override for testing.
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub ha_context: Option<HaContext>,
}

/// Home Assistant identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaContext {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversationRequest {
    /// Map the wire request onto a pipeline turn.
    pub fn into_turn(self) -> TurnRequest {
        let ctx = self.context;
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let conversation_id = non_blank(ctx.conversation_id);
        let session_id = non_blank(ctx.session_id)
            .or_else(|| {
                conversation_id
                    .as_deref()
                    .map(|c| format!("{VOICE_SESSION_PREFIX}{c}"))
            })
            .unwrap_or_default();

        let source = non_blank(ctx.source).or_else(|| {
            Some(if ctx.voice_interaction == Some(true) {
                "voice".to_owned()
            } else {
                "api".to_owned()
            })
        });

        let (agent_id, user_id) = match ctx.ha_context {
            Some(ha) => (non_blank(ha.agent_id), non_blank(ha.user_id)),
            None => (None, None),
        };

        let mut context = serde_json::Map::new();
        let entries = [
            ("device_id", non_blank(ctx.device_id)),
            ("source", source),
            ("persona", non_blank(ctx.persona)),
            ("user_id", user_id),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                context.insert(key.to_owned(), serde_json::Value::String(value));
            }
        }

        TurnRequest {
            session_id,
            text: self.message,
            language: non_blank(ctx.language),
            conversation_id,
            agent_id,
            context,
        }
    }
}

/// Build the envelope for a finished turn.
pub fn envelope(outcome: &TurnOutcome) -> ConversationEnvelope {
    let mut data = match serde_json::to_value(&outcome.response) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(error = %e, "could not serialize turn response");
            return ConversationEnvelope {
                success: false,
                data: None,
                error: Some("response serialization failed".to_owned()),
            };
        }
    };

    if let (Some(error), Some(obj)) = (&outcome.error, data.as_object_mut()) {
        obj.insert("response_type".to_owned(), "error".into());
        obj.insert(
            "speech_text".to_owned(),
            outcome.response.speech().to_owned().into(),
        );
        obj.insert("error_details".to_owned(), error.code().into());
    }

    ConversationEnvelope {
        success: true,
        data: Some(data),
        error: None,
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    pipeline: Arc<TurnPipeline>,
}

/// The router, without binding. Useful for in-process tests.
pub fn router(pipeline: Arc<TurnPipeline>) -> Router {
    Router::new()
        .route(CONVERSATION_PATH, post(handle_conversation))
        .with_state(AppState { pipeline })
}

/// Conversation HTTP server running on a background task.
pub struct CubeServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl CubeServer {
    /// Bind `{host}:{port}` (port `0` picks one) and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot bind.
    pub async fn start(pipeline: Arc<TurnPipeline>, config: &ServerConfig) -> crate::error::Result<Self> {
        let app = router(pipeline);

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| CubeError::Server(format!("bind {bind_addr} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| CubeError::Server(format!("failed to get local addr: {e}")))?;

        info!("conversation server listening on http://{addr}{CONVERSATION_PATH}");

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!("conversation server error: {e}");
            }
        });

        Ok(Self {
            addr,
            handle,
            shutdown,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections and let in-flight turns finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Err(e) = (&mut self.handle).await {
            tracing::warn!(error = %e, "conversation server task ended abnormally");
        }
    }
}

impl Drop for CubeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_conversation(
    State(state): State<AppState>,
    body: Result<Json<ConversationRequest>, JsonRejection>,
) -> (StatusCode, Json<ConversationEnvelope>) {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "rejected conversation request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ConversationEnvelope {
                    success: false,
                    data: None,
                    error: Some(rejection.body_text()),
                }),
            );
        }
    };

    let request_id = Uuid::new_v4();
    if let Some(sent_at) = &request.context.timestamp {
        tracing::debug!(%request_id, sent_at = %sent_at, "conversation request received");
    }
    let turn = request.into_turn();
    let span = tracing::info_span!("request", %request_id);
    let outcome = state.pipeline.handle(turn).instrument(span).await;

    (StatusCode::OK, Json(envelope(&outcome)))
}

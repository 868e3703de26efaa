//! Fire-and-forget hand-off of tool intentions to the background worker.
//!
//! The turn pipeline packages the model's natural-language intentions into a
//! [`ToolIntentDispatch`] command and pushes it onto a bounded channel. It
//! never waits for, or observes, the outcome.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::conversation::types::ToolIntention;

/// Stable error codes for dispatch failures.
pub mod error_codes {
    pub const QUEUE_FULL: &str = "DISPATCH_QUEUE_FULL";
    pub const QUEUE_CLOSED: &str = "DISPATCH_QUEUE_CLOSED";
}

/// Command asking the background worker to carry out intentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolIntentDispatch {
    /// Combined instruction: the user utterance plus each `tool: intent`.
    pub instruction: String,
    pub intentions: Vec<ToolIntention>,
    pub session_id: String,
    pub conversation_id: i64,
    pub user_message: String,
}

/// Why a dispatch could not be queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("[{}] intention queue is full", error_codes::QUEUE_FULL)]
    QueueFull,

    #[error("[{}] intention worker has stopped", error_codes::QUEUE_CLOSED)]
    Closed,
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueueFull => error_codes::QUEUE_FULL,
            Self::Closed => error_codes::QUEUE_CLOSED,
        }
    }
}

/// Sink for tool-intention commands.
pub trait IntentDispatcher: Send + Sync {
    /// Queue a command without waiting.
    fn dispatch(&self, command: ToolIntentDispatch) -> Result<(), DispatchError>;
}

/// [`IntentDispatcher`] backed by a bounded `tokio::mpsc` channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<ToolIntentDispatch>,
}

impl ChannelDispatcher {
    pub fn new(tx: mpsc::Sender<ToolIntentDispatch>) -> Self {
        Self { tx }
    }
}

impl IntentDispatcher for ChannelDispatcher {
    fn dispatch(&self, command: ToolIntentDispatch) -> Result<(), DispatchError> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(session_id = %dropped.session_id, "intention queue full, dropping dispatch");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                tracing::warn!(session_id = %dropped.session_id, "intention queue closed, dropping dispatch");
                Err(DispatchError::Closed)
            }
        }
    }
}

/// Create a bounded dispatch channel.
pub fn channel(capacity: usize) -> (ChannelDispatcher, mpsc::Receiver<ToolIntentDispatch>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelDispatcher::new(tx), rx)
}

/// Build the combined instruction: the utterance, then `tool: intent` pairs joined by `"; "`.
pub fn build_instruction(user_message: &str, intentions: &[ToolIntention]) -> String {
    let actions = intentions
        .iter()
        .map(|i| format!("{}: {}", i.tool, i.intent))
        .collect::<Vec<_>>()
        .join("; ");
    format!("User said: \"{}\". Carry out: {actions}", user_message.trim())
}

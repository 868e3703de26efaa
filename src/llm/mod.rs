//! Structured-output LLM client.
//!
//! - `error`: [`LlmError`] with stable codes.
//! - `message`: chat [`Message`] and [`Role`].
//! - `types`: [`StructuredRequest`] / [`StructuredResponse`].
//! - `provider`: the [`StructuredLlm`] trait the pipeline depends on.
//! - `openai`: OpenAI-compatible HTTP adapter.

pub mod error;
pub mod message;
pub mod openai;
pub mod provider;
pub mod types;

pub use error::LlmError;
pub use message::{Message, Role};
pub use openai::{OpenAiAdapter, OpenAiConfig};
pub use provider::StructuredLlm;
pub use types::{StructuredRequest, StructuredResponse, TokenUsage};

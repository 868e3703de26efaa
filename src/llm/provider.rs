//! Provider abstraction for structured completions.

use async_trait::async_trait;

use super::error::LlmError;
use super::types::{StructuredRequest, StructuredResponse};

/// A language model that can answer with a schema-constrained JSON object.
///
/// Implementations own their transport timeout; a timeout surfaces as
/// [`LlmError::TimeoutError`]. Empty content or an empty object surfaces as
/// [`LlmError::EmptyResponse`].
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Run one completion.
    async fn complete_structured(
        &self,
        request: &StructuredRequest,
    ) -> Result<StructuredResponse, LlmError>;
}

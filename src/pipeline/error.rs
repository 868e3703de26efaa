//! Error taxonomy for the conversation turn pipeline.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and reported to the voice front-end in
//! place of a stack trace.

use crate::conversation::store::StoreError;
use crate::llm::error::LlmError;

/// Stable error codes for pipeline failures.
pub mod error_codes {
    /// A required field was missing or blank at a stage boundary.
    pub const INVALID_INPUT: &str = "INVALID_INPUT";

    /// No persona could be resolved for the turn.
    pub const NO_PERSONA_AVAILABLE: &str = "NO_PERSONA_AVAILABLE";

    /// The model call failed, timed out, or returned nothing usable.
    pub const LLM_CALL_FAILED: &str = "LLM_CALL_FAILED";

    /// A single tool call failed. Recorded per tool, never fatal.
    pub const TOOL_EXECUTION_FAILED: &str = "TOOL_EXECUTION_FAILED";

    /// A store read or write failed.
    pub const PERSISTENCE_FAILED: &str = "PERSISTENCE_FAILED";

    /// A stage failed for a reason not covered above.
    pub const STAGE_FAILED: &str = "STAGE_FAILED";
}

/// Pipeline stage names used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Intention,
    Actions,
    Synthesis,
    Finalize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::Intention => "intention",
            Self::Actions => "actions",
            Self::Synthesis => "synthesis",
            Self::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Errors that end a turn early.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("[{}] {}", error_codes::INVALID_INPUT, .0)]
    InvalidInput(String),

    #[error("[{}] {}", error_codes::NO_PERSONA_AVAILABLE, .0)]
    NoPersonaAvailable(String),

    #[error("[{}] {}", error_codes::LLM_CALL_FAILED, .0)]
    LlmCallFailed(#[source] LlmError),

    #[error("[{}] {}", error_codes::TOOL_EXECUTION_FAILED, .0)]
    ToolExecutionFailed(String),

    #[error("[{}] {}", error_codes::PERSISTENCE_FAILED, .0)]
    PersistenceFailed(#[source] StoreError),

    #[error("[{}] {stage}: {message}", error_codes::STAGE_FAILED)]
    StageFailed { stage: Stage, message: String },
}

impl PipelineError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => error_codes::INVALID_INPUT,
            Self::NoPersonaAvailable(_) => error_codes::NO_PERSONA_AVAILABLE,
            Self::LlmCallFailed(_) => error_codes::LLM_CALL_FAILED,
            Self::ToolExecutionFailed(_) => error_codes::TOOL_EXECUTION_FAILED,
            Self::PersistenceFailed(_) => error_codes::PERSISTENCE_FAILED,
            Self::StageFailed { .. } => error_codes::STAGE_FAILED,
        }
    }

    /// Shorthand for a blank or missing field.
    pub fn missing(field: &str) -> Self {
        Self::InvalidInput(format!("{field} is required"))
    }

    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            message: message.into(),
        }
    }
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        Self::LlmCallFailed(e)
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::PersistenceFailed(e)
    }
}

/// Convenience alias for pipeline results.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = PipelineError::missing("session_id");
        assert_eq!(err.to_string(), "[INVALID_INPUT] session_id is required");
        assert_eq!(err.code(), error_codes::INVALID_INPUT);
    }

    #[test]
    fn llm_errors_wrap_as_llm_call_failed() {
        let err: PipelineError = LlmError::TimeoutError("120s".into()).into();
        assert_eq!(err.code(), error_codes::LLM_CALL_FAILED);
        assert!(err.to_string().contains("TIMEOUT_ERROR"));
    }

    #[test]
    fn stage_failure_names_stage() {
        let err = PipelineError::stage(Stage::Actions, "worker gone");
        assert_eq!(err.to_string(), "[STAGE_FAILED] actions: worker gone");
    }

    #[test]
    fn store_errors_wrap_as_persistence_failed() {
        let err: PipelineError = StoreError::Lock("poisoned".into()).into();
        assert_eq!(err.code(), error_codes::PERSISTENCE_FAILED);
    }
}
